use cs_core::config::TerminalConfig;

/// Where the session is in its lifecycle. `Startup` becomes `Ready` exactly
/// once, when the echo of the set-prompt command is seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Startup,
    Ready,
}

/// What the line pump should do with a classified line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineAction {
    /// Echo of the start-shell command: print the welcome banner instead.
    Welcome,
    /// Message of the day: print it and signal any pending completion.
    ForwardAndSignal,
    /// Print the line verbatim.
    Forward,
    /// Echo of the set-prompt command: the session is now initialized.
    BecomeReady,
    /// The remote prompt: a tentative end-of-command marker.
    Prompt,
    /// Startup noise.
    Drop,
}

/// The strings the handshake is recognised by.
#[derive(Debug, Clone)]
pub struct Markers {
    pub start_shell_command: String,
    pub set_prompt_command: String,
    pub motd: String,
    pub verbose: String,
    pub prompt: String,
}

impl From<&TerminalConfig> for Markers {
    fn from(cfg: &TerminalConfig) -> Self {
        Self {
            start_shell_command: cfg.start_shell_command.clone(),
            set_prompt_command: cfg.set_prompt_command.clone(),
            motd: cfg.motd_marker.clone(),
            verbose: cfg.verbose_marker.clone(),
            prompt: cfg.prompt.clone(),
        }
    }
}

type Rule = (fn(&Markers, &str) -> bool, LineAction);

/// Startup rules, tried in order; the first match wins.
const STARTUP_RULES: [Rule; 4] = [
    (echoes_start_shell, LineAction::Welcome),
    (is_motd, LineAction::ForwardAndSignal),
    (is_verbose, LineAction::Forward),
    (echoes_set_prompt, LineAction::BecomeReady),
];

fn contains_marker(line: &str, marker: &str) -> bool {
    !marker.is_empty() && line.contains(marker)
}

fn echoes_start_shell(m: &Markers, line: &str) -> bool {
    contains_marker(line, &m.start_shell_command)
}

fn is_motd(m: &Markers, line: &str) -> bool {
    contains_marker(line, &m.motd)
}

fn is_verbose(m: &Markers, line: &str) -> bool {
    contains_marker(line, &m.verbose)
}

fn echoes_set_prompt(m: &Markers, line: &str) -> bool {
    contains_marker(line, &m.set_prompt_command)
}

/// Classifies decoded lines against the startup handshake and, once ready,
/// against the prompt.
#[derive(Debug, Clone)]
pub struct LineClassifier {
    phase: Phase,
    markers: Markers,
}

impl LineClassifier {
    pub fn new(markers: Markers) -> Self {
        Self {
            phase: Phase::Startup,
            markers,
        }
    }

    pub fn classify(&mut self, line: &str) -> LineAction {
        match self.phase {
            Phase::Startup => {
                let action = STARTUP_RULES
                    .iter()
                    .find(|(matches, _)| matches(&self.markers, line))
                    .map_or(LineAction::Drop, |&(_, action)| action);
                if action == LineAction::BecomeReady {
                    self.phase = Phase::Ready;
                }
                action
            }
            Phase::Ready if is_prompt(line, &self.markers.prompt) => LineAction::Prompt,
            Phase::Ready => LineAction::Forward,
        }
    }
}

/// True if `line` is the prompt, optionally preceded by terminal escape
/// sequences. Trailing whitespace is ignored on both sides.
pub fn is_prompt(line: &str, prompt: &str) -> bool {
    strip_escape_prefix(line).trim_end() == prompt.trim_end()
}

/// Remove leading ANSI escape sequences (CSI, OSC and two-byte escapes).
pub fn strip_escape_prefix(mut s: &str) -> &str {
    while let Some(rest) = s.strip_prefix('\x1b') {
        let bytes = rest.as_bytes();
        s = match bytes.first() {
            // CSI: parameters/intermediates then a final byte in 0x40..=0x7e
            Some(b'[') => match bytes[1..].iter().position(|b| (0x40..=0x7e).contains(b)) {
                Some(end) => &rest[end + 2..],
                None => return "",
            },
            // OSC: terminated by BEL or ST (ESC \)
            Some(b']') => {
                let bel = rest.find('\x07').map(|i| i + 1);
                let st = rest.find("\x1b\\").map(|i| i + 2);
                match (bel, st) {
                    (Some(a), Some(b)) => &rest[a.min(b)..],
                    (Some(end), None) | (None, Some(end)) => &rest[end..],
                    (None, None) => return "",
                }
            }
            Some(_) => {
                let width = rest.chars().next().map_or(0, char::len_utf8);
                &rest[width..]
            }
            None => "",
        };
    }
    s
}
