/// Slash commands understood outside the report conversation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    NewReport,
    Cancel,
    MyReports,
    Stats,
    DailySummary,
    Export,
}

impl Command {
    /// Parses `/name`, `/name@bot_username` and `/name args`. Returns `None`
    /// for anything that is not a known command.
    pub fn parse(text: &str) -> Option<Self> {
        let head = text.split_whitespace().next()?;
        let name = head.strip_prefix('/')?;
        let name = name.split('@').next().unwrap_or(name);
        match name.to_ascii_lowercase().as_str() {
            "start" => Some(Self::Start),
            "help" => Some(Self::Help),
            "new_report" | "report" => Some(Self::NewReport),
            "cancel" => Some(Self::Cancel),
            "my_reports" => Some(Self::MyReports),
            "stats" => Some(Self::Stats),
            "summary" => Some(Self::DailySummary),
            "export" | "excel" => Some(Self::Export),
            _ => None,
        }
    }

    pub fn is_command_like(text: &str) -> bool {
        text.trim_start().starts_with('/')
    }
}

pub const HELP_TEXT: &str = "<b>Field work reports</b>\n\n\
/new_report - start a new report\n\
/cancel - cancel the report in progress\n\
/my_reports - your latest reports\n\
/stats - overall statistics\n\
/summary - today's reports\n\
/export - download your reports as a spreadsheet\n\
/help - show this message";

pub const WELCOME_TEXT: &str = "Hello! I collect field work reports.\n\
Send /new_report to fill one in, or /help to see what else I can do.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_commands_with_mentions_and_arguments() {
        assert_eq!(Command::parse("/start"), Some(Command::Start));
        assert_eq!(Command::parse("  /new_report  "), Some(Command::NewReport));
        assert_eq!(
            Command::parse("/my_reports@crew_bot"),
            Some(Command::MyReports)
        );
        assert_eq!(Command::parse("/EXPORT now"), Some(Command::Export));
        assert_eq!(Command::parse("/excel"), Some(Command::Export));
        assert_eq!(Command::parse("/summary"), Some(Command::DailySummary));
        assert_eq!(Command::parse("/stats"), Some(Command::Stats));
    }

    #[test]
    fn rejects_plain_text_and_unknown_commands() {
        assert_eq!(Command::parse("start"), None);
        assert_eq!(Command::parse("/launch"), None);
        assert_eq!(Command::parse(""), None);
        assert!(Command::is_command_like(" /launch"));
        assert!(!Command::is_command_like("Acme"));
    }
}
