//! Token actions offered once an exchange has produced tokens.

use auth_tool_core::{FlowController, HttpTransport, KeyValueStore, SessionView};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::error;

use crate::output;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Refresh,
    CopyAccessToken,
    CopyAuthorizationHeader,
    Show,
    Quit,
}

impl Action {
    fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "r" | "refresh" => Some(Action::Refresh),
            "t" | "token" => Some(Action::CopyAccessToken),
            "h" | "header" => Some(Action::CopyAuthorizationHeader),
            "s" | "show" => Some(Action::Show),
            "q" | "quit" | "exit" => Some(Action::Quit),
            _ => None,
        }
    }
}

fn menu(view: &SessionView) -> String {
    let mut entries = Vec::new();
    if view.controls.refresh {
        entries.push("[r]efresh");
    }
    if view.controls.copy_access_token {
        entries.push("[t]oken");
    }
    if view.controls.copy_authorization_header {
        entries.push("[h]eader");
    }
    entries.push("[s]how");
    entries.push("[q]uit");
    format!("{} > ", entries.join("  "))
}

/// Prompt on stdin until the operator quits or stdin closes. Only the
/// actions enabled for the current phase are accepted.
pub async fn run<T, S>(controller: &mut FlowController<T, S>) -> anyhow::Result<()>
where
    T: HttpTransport,
    S: KeyValueStore,
{
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let view = controller.view();
        eprint!("{}", menu(&view));

        let Some(line) = lines.next_line().await? else {
            eprintln!();
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let Some(action) = Action::parse(&line) else {
            eprintln!("Unknown action '{}'", line.trim());
            continue;
        };

        match action {
            Action::Refresh if view.controls.refresh => match controller.refresh().await {
                Ok(outcome) => output::token_outcome("Refresh response", &outcome)?,
                Err(e) => {
                    error!("Refresh failed: {}", e);
                    eprintln!("{}", e.report());
                }
            },
            Action::CopyAccessToken => match controller.access_token() {
                Some(token) => println!("{}", token),
                None => eprintln!("No usable access token"),
            },
            Action::CopyAuthorizationHeader => match controller.authorization_header() {
                Some(header) => println!("{}", header),
                None => eprintln!("No usable access token"),
            },
            Action::Show => output::json("Session", &view)?,
            Action::Quit => break,
            Action::Refresh => eprintln!("Refresh is not available right now"),
        }
    }

    Ok(())
}
