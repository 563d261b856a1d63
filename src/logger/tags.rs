/// Log tags identifying which part of the relay produced a line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTag {
    System,
    Config,
    Webserver,
    Hub,
    Connection,
    Store,
    Persist,
}

impl LogTag {
    /// Key used by --debug-<key> flags
    pub fn to_debug_key(&self) -> String {
        match self {
            LogTag::System => "system".to_string(),
            LogTag::Config => "config".to_string(),
            LogTag::Webserver => "webserver".to_string(),
            LogTag::Hub => "hub".to_string(),
            LogTag::Connection => "connection".to_string(),
            LogTag::Store => "store".to_string(),
            LogTag::Persist => "persist".to_string(),
        }
    }

    /// Uncolored label used in the log file
    pub fn to_plain_string(&self) -> String {
        self.to_debug_key().to_uppercase()
    }
}

impl std::fmt::Display for LogTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_plain_string())
    }
}
