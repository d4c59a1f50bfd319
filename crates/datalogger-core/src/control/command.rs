use core::str::FromStr;

/// Commands understood over the wireless link.
///
/// Matching is exact and case-sensitive after trimming surrounding
/// whitespace. Anything else is not a command and is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `DATALOG`: send the whole log
    DataLog,
    /// `TOGGLE ON AUTOUPDATE`: stream every new reading
    LiveModeOn,
    /// `TOGGLE OFF AUTOUPDATE`: stop streaming
    LiveModeOff,
}

impl Command {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DataLog => "DATALOG",
            Self::LiveModeOn => "TOGGLE ON AUTOUPDATE",
            Self::LiveModeOff => "TOGGLE OFF AUTOUPDATE",
        }
    }

    pub fn parse(line: &str) -> Option<Self> {
        match line.trim() {
            "DATALOG" => Some(Self::DataLog),
            "TOGGLE ON AUTOUPDATE" => Some(Self::LiveModeOn),
            "TOGGLE OFF AUTOUPDATE" => Some(Self::LiveModeOff),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownCommand;

impl FromStr for Command {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or(UnknownCommand)
    }
}
