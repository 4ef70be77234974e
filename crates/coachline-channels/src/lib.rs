//! # coachline-channels
//!
//! Messaging platform integrations for Coachline.

pub mod telegram;
