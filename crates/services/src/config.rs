use std::env;
use std::time::Duration;

/// Debounce delay between the last edit and its autosave.
pub const DEFAULT_AUTOSAVE_DELAY: Duration = Duration::from_millis(500);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    pub autosave_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            autosave_delay: DEFAULT_AUTOSAVE_DELAY,
        }
    }
}

impl SessionConfig {
    /// Reads `COURSE_AUTOSAVE_MS`, falling back to the default on absent or bad input.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_autosave_ms(env::var("COURSE_AUTOSAVE_MS").ok().as_deref())
    }

    fn from_autosave_ms(raw: Option<&str>) -> Self {
        let autosave_delay = raw
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map_or(DEFAULT_AUTOSAVE_DELAY, Duration::from_millis);
        Self { autosave_delay }
    }

    #[must_use]
    pub fn with_autosave_delay(mut self, delay: Duration) -> Self {
        self.autosave_delay = delay;
        self
    }
}
