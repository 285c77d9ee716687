//! Admin command parser for Hearth.
//!
//! Raw command lines like `/ban @alice,@bob 10 spamming` are parsed into a
//! structured [`Command`] before any verb-specific logic runs. Parsing is a
//! two-stage pass: tokenize on whitespace, then classify each token as a
//! mention, a duration, or the start of the free-text remainder.

/// A parsed admin command verb.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verb {
    /// Send a pinned announcement to everyone.
    Broadcast,
    /// Force-disconnect the targets.
    Kick,
    /// Ban the targets, optionally for a number of minutes.
    Ban,
    /// Remove ban records for the targets.
    Unban,
    /// Mute the targets for a number of minutes.
    Mute,
    /// Remove mute records for the targets.
    Unmute,
    /// Tell all clients to clear their local chat history.
    ClearAll,
    /// Unrecognized verb.
    Unknown(String),
}

impl Verb {
    /// Parse a verb token (case-insensitive, leading `/` optional).
    fn from_token(token: &str) -> Self {
        match token.trim_start_matches('/').to_lowercase().as_str() {
            "broadcast" | "b" => Verb::Broadcast,
            "kick" => Verb::Kick,
            "ban" => Verb::Ban,
            "unban" => Verb::Unban,
            "mute" => Verb::Mute,
            "unmute" => Verb::Unmute,
            "clearall" => Verb::ClearAll,
            other => Verb::Unknown(other.to_string()),
        }
    }

    /// Whether the verb requires at least one `@`-mention target.
    pub fn requires_target(&self) -> bool {
        matches!(
            self,
            Verb::Kick | Verb::Ban | Verb::Unban | Verb::Mute | Verb::Unmute
        )
    }

    /// Whether an integer token after the mentions is consumed as minutes.
    pub fn takes_duration(&self) -> bool {
        matches!(self, Verb::Ban | Verb::Mute)
    }

    /// Get the canonical verb name.
    pub fn name(&self) -> &str {
        match self {
            Verb::Broadcast => "broadcast",
            Verb::Kick => "kick",
            Verb::Ban => "ban",
            Verb::Unban => "unban",
            Verb::Mute => "mute",
            Verb::Unmute => "unmute",
            Verb::ClearAll => "clearall",
            Verb::Unknown(name) => name,
        }
    }
}

/// A structured admin command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// The verb.
    pub verb: Verb,
    /// Ordered, deduplicated target usernames (dedup is case-insensitive,
    /// first spelling wins).
    pub targets: Vec<String>,
    /// Duration in minutes, for duration-taking verbs.
    pub duration: Option<u64>,
    /// Free text following the targets and duration.
    pub remainder: String,
}

/// Parse a raw command line. Returns None for blank input.
///
/// The first whitespace-delimited token is the verb. Remaining tokens are
/// scanned in order: `@`-tokens are split on commas into targets until the
/// first token that does not begin with `@`, which starts the remainder
/// (further `@`-tokens included verbatim). For duration-taking verbs a
/// pure-integer token immediately after the last mention is consumed as a
/// minutes value before the remainder is computed.
pub fn parse(raw: &str) -> Option<Command> {
    let mut tokens = raw.split_whitespace();
    let verb = Verb::from_token(tokens.next()?);

    let rest: Vec<&str> = tokens.collect();
    let mut targets: Vec<String> = Vec::new();
    let mut seen: Vec<String> = Vec::new();
    let mut index = 0;

    while index < rest.len() && rest[index].starts_with('@') {
        for piece in rest[index].split(',') {
            let name = piece.trim().trim_start_matches('@').trim();
            if name.is_empty() {
                continue;
            }
            let folded = name.to_lowercase();
            if !seen.contains(&folded) {
                seen.push(folded);
                targets.push(name.to_string());
            }
        }
        index += 1;
    }

    let mut duration = None;
    if verb.takes_duration() && index < rest.len() && is_integer(rest[index]) {
        duration = rest[index].parse::<u64>().ok();
        index += 1;
    }

    let remainder = rest[index..].join(" ");

    Some(Command {
        verb,
        targets,
        duration,
        remainder,
    })
}

fn is_integer(token: &str) -> bool {
    !token.is_empty() && token.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ban_with_targets_duration_and_remainder() {
        let cmd = parse("/ban @alice,@bob 10 spamming").unwrap();
        assert_eq!(cmd.verb, Verb::Ban);
        assert_eq!(cmd.targets, vec!["alice", "bob"]);
        assert_eq!(cmd.duration, Some(10));
        assert_eq!(cmd.remainder, "spamming");
    }

    #[test]
    fn test_parse_verb_case_insensitive_and_slash_optional() {
        assert_eq!(parse("/BAN @x").unwrap().verb, Verb::Ban);
        assert_eq!(parse("ban @x").unwrap().verb, Verb::Ban);
        assert_eq!(parse("Kick @x").unwrap().verb, Verb::Kick);
    }

    #[test]
    fn test_parse_broadcast_alias() {
        let cmd = parse("/b hello world").unwrap();
        assert_eq!(cmd.verb, Verb::Broadcast);
        assert!(cmd.targets.is_empty());
        assert_eq!(cmd.remainder, "hello world");
    }

    #[test]
    fn test_parse_bare_verb() {
        let cmd = parse("/kick").unwrap();
        assert_eq!(cmd.verb, Verb::Kick);
        assert!(cmd.targets.is_empty());
        assert!(cmd.duration.is_none());
        assert!(cmd.remainder.is_empty());
    }

    #[test]
    fn test_parse_blank_input() {
        assert!(parse("").is_none());
        assert!(parse("   ").is_none());
    }

    #[test]
    fn test_parse_comma_separated_mentions() {
        let cmd = parse("/mute @alice,bob,@carol 5").unwrap();
        assert_eq!(cmd.targets, vec!["alice", "bob", "carol"]);
        assert_eq!(cmd.duration, Some(5));
    }

    #[test]
    fn test_parse_multiple_mention_tokens() {
        let cmd = parse("/kick @alice @bob flooding").unwrap();
        assert_eq!(cmd.targets, vec!["alice", "bob"]);
        assert_eq!(cmd.remainder, "flooding");
    }

    #[test]
    fn test_parse_dedup_is_case_insensitive_first_spelling_wins() {
        let cmd = parse("/ban @Alice,@alice,@ALICE").unwrap();
        assert_eq!(cmd.targets, vec!["Alice"]);
    }

    #[test]
    fn test_parse_remainder_includes_later_mentions() {
        let cmd = parse("/ban @alice spam from @bob").unwrap();
        assert_eq!(cmd.targets, vec!["alice"]);
        assert_eq!(cmd.remainder, "spam from @bob");
    }

    #[test]
    fn test_parse_integer_not_consumed_for_non_duration_verbs() {
        let cmd = parse("/kick @alice 10 reasons").unwrap();
        assert!(cmd.duration.is_none());
        assert_eq!(cmd.remainder, "10 reasons");
    }

    #[test]
    fn test_parse_non_integer_after_mentions_starts_remainder() {
        let cmd = parse("/ban @alice 10m spam").unwrap();
        assert!(cmd.duration.is_none());
        assert_eq!(cmd.remainder, "10m spam");
    }

    #[test]
    fn test_parse_ban_without_duration() {
        let cmd = parse("/ban @alice being rude").unwrap();
        assert!(cmd.duration.is_none());
        assert_eq!(cmd.remainder, "being rude");
    }

    #[test]
    fn test_parse_empty_mention_pieces_are_skipped() {
        let cmd = parse("/ban @alice,,@ spam").unwrap();
        assert_eq!(cmd.targets, vec!["alice"]);
        assert_eq!(cmd.remainder, "spam");
    }

    #[test]
    fn test_parse_unknown_verb() {
        let cmd = parse("/frobnicate @x").unwrap();
        assert_eq!(cmd.verb, Verb::Unknown("frobnicate".to_string()));
        assert_eq!(cmd.verb.name(), "frobnicate");
    }

    #[test]
    fn test_parse_clearall() {
        let cmd = parse("/clearall").unwrap();
        assert_eq!(cmd.verb, Verb::ClearAll);
        assert!(!cmd.verb.requires_target());
    }

    #[test]
    fn test_verb_properties() {
        assert!(Verb::Kick.requires_target());
        assert!(Verb::Ban.requires_target());
        assert!(!Verb::Broadcast.requires_target());
        assert!(Verb::Ban.takes_duration());
        assert!(Verb::Mute.takes_duration());
        assert!(!Verb::Kick.takes_duration());
        assert!(!Verb::Unban.takes_duration());
    }
}
