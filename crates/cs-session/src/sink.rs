use std::io::Write;

/// Destination for relayed lines. The relay only ever writes to it.
pub trait OutputSink: Send + Sync {
    fn write_line(&self, line: &str);
}

/// Writes each line to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl OutputSink for ConsoleSink {
    fn write_line(&self, line: &str) {
        let mut out = std::io::stdout().lock();
        // A closed stdout is not the relay's problem.
        let _ = writeln!(out, "{line}");
        let _ = out.flush();
    }
}

/// Sends each line into a channel, for embedders and tests.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: flume::Sender<String>,
}

impl ChannelSink {
    pub fn new() -> (Self, flume::Receiver<String>) {
        let (tx, rx) = flume::unbounded();
        (Self { tx }, rx)
    }
}

impl OutputSink for ChannelSink {
    fn write_line(&self, line: &str) {
        let _ = self.tx.send(line.to_string());
    }
}
