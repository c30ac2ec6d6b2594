//! Prompt framing for outbound user turns

/// Commands that finish without assistant text, with the confirmation to show
const SILENT_COMMANDS: &[(&str, &str)] = &[("/compact", "Context compacted.")];

/// Frame a chat message as the prompt written to the agent
///
/// A message whose first token is a slash command (other than the skill
/// prefix) is forwarded as a command, with underscores in the command name
/// turned into hyphens (`/gtd_daily_review x` becomes `/gtd-daily-review x`).
/// Anything else is prefixed with the skill invocation when one is set.
#[must_use]
pub fn format_prompt(message: &str, skill_prefix: Option<&str>) -> String {
    let (command, _) = split_command(message);
    let is_skill = skill_prefix.is_some_and(|prefix| command == prefix);

    if message.starts_with('/') && !is_skill {
        return normalize_command(message);
    }

    match skill_prefix {
        Some(prefix) if !is_skill => format!("{prefix} {message}"),
        _ => message.to_string(),
    }
}

/// Confirmation to show for a command that yields no assistant text
#[must_use]
pub fn silent_command_confirmation(message: &str) -> Option<&'static str> {
    let (command, _) = split_command(message);
    let command = command.replace('_', "-");
    SILENT_COMMANDS
        .iter()
        .find(|(name, _)| *name == command)
        .map(|(_, confirmation)| *confirmation)
}

fn normalize_command(message: &str) -> String {
    match split_command(message) {
        (command, Some(args)) => format!("{} {}", command.replace('_', "-"), args),
        (command, None) => command.replace('_', "-"),
    }
}

fn split_command(message: &str) -> (&str, Option<&str>) {
    match message.split_once(' ') {
        Some((command, args)) => (command, Some(args)),
        None => (message, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_underscores_become_hyphens() {
        assert_eq!(
            format_prompt("/gtd_daily_review now_please", Some("/relay")),
            "/gtd-daily-review now_please"
        );
        assert_eq!(format_prompt("/commit", Some("/relay")), "/commit");
    }

    #[test]
    fn test_plain_message_gets_skill_prefix() {
        assert_eq!(format_prompt("hello", Some("/relay")), "/relay hello");
        assert_eq!(format_prompt("hello", None), "hello");
    }

    #[test]
    fn test_skill_prefix_not_doubled() {
        assert_eq!(format_prompt("/relay hi", Some("/relay")), "/relay hi");
    }

    #[test]
    fn test_silent_commands() {
        assert_eq!(silent_command_confirmation("/compact"), Some("Context compacted."));
        assert_eq!(
            silent_command_confirmation("/compact keep the plan"),
            Some("Context compacted.")
        );
        assert_eq!(silent_command_confirmation("/commit"), None);
        assert_eq!(silent_command_confirmation("compact"), None);
    }
}
