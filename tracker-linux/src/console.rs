//! Console presenter: logs view changes and reads identity commands from stdin.

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracker_core::{Condition, RouteView, SessionState, SessionView};

use crate::agent::{AgentError, AgentHandle};

#[derive(Debug, PartialEq)]
pub enum Command {
    SetIdentity(String),
    ClearIdentity,
    RefetchRoute,
    Quit,
}

/// `id <ID>`, `clear`, `route` or `quit`. A bare line while no identity is bound is
/// taken as the identity.
pub fn parse_command(line: &str, awaiting_identity: bool) -> Option<Command> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((w, r)) => (w, r.trim()),
        None => (line, ""),
    };
    match word {
        "" => None,
        "id" if !rest.is_empty() => Some(Command::SetIdentity(rest.to_string())),
        "clear" if rest.is_empty() => Some(Command::ClearIdentity),
        "route" if rest.is_empty() => Some(Command::RefetchRoute),
        "quit" | "exit" if rest.is_empty() => Some(Command::Quit),
        _ if awaiting_identity => Some(Command::SetIdentity(line.to_string())),
        _ => None,
    }
}

pub fn describe_session(view: &SessionView) -> String {
    let who = view.identity.as_ref().map(|i| i.as_str()).unwrap_or("-");
    let center = view.center();
    let mut line = format!(
        "{:?} vehicle={} at {:.6},{:.6}",
        view.state,
        who,
        center.lat(),
        center.lng()
    );
    if view.position.is_none() {
        line.push_str(" (default center)");
    }
    match &view.condition {
        Some(Condition::PermissionDenied) => line.push_str(" [location permission denied]"),
        Some(Condition::LocationUnavailable(e)) => {
            line.push_str(&format!(" [location unavailable: {}]", e))
        }
        None => {}
    }
    line
}

pub fn describe_route(view: &RouteView) -> String {
    if view.fetch_failed {
        return "route unavailable, type `route` to retry".to_string();
    }
    match (view.route.start(), view.route.end()) {
        (Some(a), Some(b)) => format!(
            "route {} points, start {:.6},{:.6} end {:.6},{:.6}",
            view.route.len(),
            a.lat(),
            a.lng(),
            b.lat(),
            b.lng()
        ),
        _ => "route empty".to_string(),
    }
}

/// Log every published view until the agent goes away.
pub async fn present(mut session: watch::Receiver<SessionView>, mut route: watch::Receiver<RouteView>) {
    info!("{}", describe_session(&session.borrow_and_update()));
    loop {
        tokio::select! {
            changed = session.changed() => {
                if changed.is_err() {
                    return;
                }
                info!("{}", describe_session(&session.borrow_and_update()));
            }
            changed = route.changed() => {
                if changed.is_err() {
                    return;
                }
                info!("{}", describe_route(&route.borrow_and_update()));
            }
        }
    }
}

/// Read commands from stdin and forward them to the agent. Returns on `quit`; after
/// EOF (e.g. running under systemd) it stays pending.
pub async fn read_commands(handle: AgentHandle) -> Result<(), AgentError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    if awaiting_identity(&handle) {
        println!("Enter vehicle ID:");
    }
    while let Ok(Some(line)) = lines.next_line().await {
        let awaiting = awaiting_identity(&handle);
        match parse_command(&line, awaiting) {
            Some(Command::SetIdentity(id)) => match handle.set_identity(&id).await {
                Err(AgentError::Identity(e)) => warn!(error = %e, "identity not accepted"),
                other => other?,
            },
            Some(Command::ClearIdentity) => match handle.clear_identity().await {
                Err(AgentError::Identity(e)) => warn!(error = %e, "could not clear identity"),
                other => other?,
            },
            Some(Command::RefetchRoute) => handle.refetch_route()?,
            Some(Command::Quit) => return Ok(()),
            None if awaiting => println!("Enter vehicle ID:"),
            None => println!("commands: id <ID>, clear, route, quit"),
        }
    }
    debug!("stdin closed, console commands disabled");
    std::future::pending::<()>().await;
    Ok(())
}

fn awaiting_identity(handle: &AgentHandle) -> bool {
    let view = handle.session();
    let view = view.borrow();
    view.identity.is_none() && view.state != SessionState::AwaitingPermission
}
