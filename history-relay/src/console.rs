use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::router::Router;

const PROMPT: &str = "relay>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    ViewList,
    Stats,
    Unknown(String),
}

impl ConsoleCommand {
    /// Returns `None` for blank input.
    pub fn parse(line: &str) -> Option<Self> {
        let command = line.trim();
        match command {
            "" => None,
            "viewlist" => Some(ConsoleCommand::ViewList),
            "stats" => Some(ConsoleCommand::Stats),
            other => Some(ConsoleCommand::Unknown(other.to_string())),
        }
    }
}

/// Operator commands read from a local control input. Output goes to the
/// wrapped writer only.
pub struct OperatorConsole<O> {
    output: O,
}

impl<O: AsyncWrite + Unpin> OperatorConsole<O> {
    pub fn new(output: O) -> Self {
        Self { output }
    }

    pub async fn handle_line<W>(&mut self, line: &str, router: &Router<W>) -> std::io::Result<()> {
        let Some(command) = ConsoleCommand::parse(line) else {
            return Ok(());
        };

        let text = match command {
            ConsoleCommand::ViewList => {
                let history = router.history();
                let mut text =
                    format!("{PROMPT} history (last {}):\n", history.capacity()).into_bytes();
                text.extend(history.render());
                text
            }
            ConsoleCommand::Stats => format!(
                "{PROMPT} clients={}, history={}\n",
                router.registry().len(),
                router.history().len()
            )
            .into_bytes(),
            ConsoleCommand::Unknown(other) => format!("{PROMPT} unknown: {other}\n").into_bytes(),
        };

        self.output.write_all(&text).await?;
        self.output.flush().await
    }

    pub fn into_inner(self) -> O {
        self.output
    }
}
