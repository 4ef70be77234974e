use super::*;
use crate::tasks::forms::{BuiltinForms, FieldSpec};

fn registry() -> CommandRegistry {
    CommandRegistry::new(COMMANDS, &BuiltinForms).unwrap()
}

#[test]
fn test_parse_universal_commands() {
    assert_eq!(UniversalCommand::parse("/logout"), Some(UniversalCommand::Logout));
    assert_eq!(
        UniversalCommand::parse("/switch-role"),
        Some(UniversalCommand::SwitchRole)
    );
    assert_eq!(
        UniversalCommand::parse("/switch_role"),
        Some(UniversalCommand::SwitchRole)
    );
    assert_eq!(
        UniversalCommand::parse("/register@coachline_bot"),
        Some(UniversalCommand::Register)
    );
    assert_eq!(UniversalCommand::parse("/STOP now"), Some(UniversalCommand::Stop));
    assert_eq!(UniversalCommand::parse("/start"), Some(UniversalCommand::Help));
    assert_eq!(UniversalCommand::parse("/log"), None);
    assert_eq!(UniversalCommand::parse("stop"), None);
    assert_eq!(UniversalCommand::parse(""), None);
}

#[test]
fn test_builtin_table_is_valid() {
    let registry = registry();
    assert_eq!(registry.for_role(Role::Trainer).count(), 14);
    assert_eq!(registry.for_role(Role::Client).count(), 11);
}

#[test]
fn test_lookup_respects_role() {
    let registry = registry();
    let log = registry.lookup(Role::Client, "/log water 2").unwrap();
    assert_eq!(log.task, TaskType::LogHabit);
    assert!(registry.lookup(Role::Trainer, "/log").is_none());
    assert_eq!(
        registry
            .lookup(Role::Trainer, "/create_habit@coachline_bot")
            .map(|c| c.task),
        Some(TaskType::CreateHabit)
    );
    assert!(registry.lookup(Role::Client, "log water").is_none());
    assert!(registry.lookup(Role::Client, "/unknown").is_none());
}

#[test]
fn test_find_by_name_accepts_bare_names() {
    let registry = registry();
    assert_eq!(
        registry.find_by_name(Role::Client, "log").map(|c| c.name),
        Some("/log")
    );
    assert_eq!(
        registry
            .find_by_name(Role::Trainer, "/assign_habit")
            .map(|c| c.name),
        Some("/assign-habit")
    );
    assert!(registry.find_by_name(Role::Client, "assign-habit").is_none());
}

#[test]
fn test_help_lists_role_commands() {
    let help = registry().help(Role::Client);
    assert!(help.contains("/log - log progress on a habit"));
    assert!(help.contains("/switch-role"));
    assert!(!help.contains("/create-habit"));
}

#[test]
fn test_rejects_universal_clash() {
    const BAD: &[CommandSpec] = &[command("/stop", BOTH, TaskType::ViewProfile, "x")];
    assert!(matches!(
        CommandRegistry::new(BAD, &BuiltinForms),
        Err(CoachlineError::Config(_))
    ));
}

#[test]
fn test_rejects_duplicate_and_bad_names() {
    const DUP: &[CommandSpec] = &[
        command("/profile", BOTH, TaskType::ViewProfile, "x"),
        command("/profile", CLIENT, TaskType::ViewProfile, "y"),
    ];
    assert!(CommandRegistry::new(DUP, &BuiltinForms).is_err());

    const NO_SLASH: &[CommandSpec] = &[command("profile", BOTH, TaskType::ViewProfile, "x")];
    assert!(CommandRegistry::new(NO_SLASH, &BuiltinForms).is_err());

    const UNDERSCORE: &[CommandSpec] =
        &[command("/view_profile", BOTH, TaskType::ViewProfile, "x")];
    assert!(CommandRegistry::new(UNDERSCORE, &BuiltinForms).is_err());
}

#[test]
fn test_rejects_missing_form() {
    struct NoForms;
    impl FormSource for NoForms {
        fn task_fields(&self, _: Role, _: TaskType) -> Option<&'static [FieldSpec]> {
            None
        }
        fn registration_fields(&self, _: Role) -> &'static [FieldSpec] {
            &[]
        }
    }
    assert!(CommandRegistry::new(COMMANDS, &NoForms).is_err());

    const WRONG_ROLE: &[CommandSpec] = &[command("/log", TRAINER, TaskType::LogHabit, "x")];
    assert!(CommandRegistry::new(WRONG_ROLE, &BuiltinForms).is_err());
}
