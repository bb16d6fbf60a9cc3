//! Interactive decision surface on stdin.
//!
//! One reader feeds every line in. A line answers the oldest open prompt; with
//! no prompt open it is a session command.

use autosort_core::models::{find_destination, trailing_segment, FileEvent};
use autosort_core::mover::ConflictPolicy;
use autosort_core::pipeline::{DecisionSurface, Notice, Proposal, UserDecision};
use autosort_core::retry::Phase;
use autosort_core::session::SessionCommand;
use std::collections::VecDeque;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Read a decision from one line of input. `None` when the line names no
/// configured destination.
pub fn parse_decision(line: &str, destinations: &[String]) -> Option<UserDecision> {
    let answer = line.trim();
    match answer.to_ascii_lowercase().as_str() {
        "" | "i" | "ignore" => return Some(UserDecision::IgnoreQuietly),
        "a" | "y" | "yes" | "accept" => return Some(UserDecision::Accept),
        "d" | "n" | "no" | "dismiss" => return Some(UserDecision::Dismiss),
        _ => {}
    }
    if let Ok(n) = answer.parse::<usize>() {
        return n
            .checked_sub(1)
            .and_then(|i| destinations.get(i))
            .map(|d| UserDecision::ChooseAlternate(d.clone()));
    }
    find_destination(destinations, answer)
        .or_else(|| {
            destinations
                .iter()
                .find(|d| trailing_segment(d).eq_ignore_ascii_case(answer))
        })
        .map(|d| UserDecision::ChooseAlternate(d.clone()))
}

pub fn parse_collision(line: &str) -> ConflictPolicy {
    match line.trim().to_ascii_lowercase().as_str() {
        "r" | "replace" => ConflictPolicy::Replace,
        "s" | "skip" => ConflictPolicy::Skip,
        _ => ConflictPolicy::KeepBoth,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Undo,
    Skipped,
    Rescue(usize),
    Flush,
    Quit,
    Help,
}

pub fn parse_command(line: &str) -> Option<ConsoleCommand> {
    let mut parts = line.split_whitespace();
    let cmd = parts.next()?.to_ascii_lowercase();
    match cmd.as_str() {
        "u" | "undo" => Some(ConsoleCommand::Undo),
        "s" | "skipped" => Some(ConsoleCommand::Skipped),
        "r" | "rescue" => parts
            .next()
            .and_then(|n| n.parse().ok())
            .map(ConsoleCommand::Rescue),
        "f" | "flush" => Some(ConsoleCommand::Flush),
        "q" | "quit" | "exit" => Some(ConsoleCommand::Quit),
        "h" | "help" | "?" => Some(ConsoleCommand::Help),
        _ => None,
    }
}

const HELP: &str = "commands: u(ndo)  s(kipped)  r(escue) <n>  f(lush)  q(uit)";

pub struct Console {
    destinations: Vec<String>,
    /// Open prompts, oldest first. `None` once input has ended.
    waiting: Mutex<Option<VecDeque<oneshot::Sender<String>>>>,
    turn: tokio::sync::Mutex<()>,
}

impl Console {
    pub fn new(destinations: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            destinations,
            waiting: Mutex::new(Some(VecDeque::new())),
            turn: tokio::sync::Mutex::new(()),
        })
    }

    /// Hand a line to the oldest open prompt. Returns it when nobody is asking.
    pub fn offer(&self, line: String) -> Option<String> {
        let Ok(mut guard) = self.waiting.lock() else {
            return Some(line);
        };
        let Some(waiting) = guard.as_mut() else {
            return Some(line);
        };
        let mut line = line;
        while let Some(tx) = waiting.pop_front() {
            match tx.send(line) {
                Ok(()) => return None,
                // Asker went away; the next one gets the line.
                Err(back) => line = back,
            }
        }
        Some(line)
    }

    async fn ask(&self, question: &str) -> String {
        let (tx, rx) = oneshot::channel();
        if let Ok(mut guard) = self.waiting.lock() {
            match guard.as_mut() {
                Some(waiting) => waiting.push_back(tx),
                // No more input: the dropped sender answers with an empty line.
                None => drop(tx),
            }
        }
        print!("{} ", question);
        let _ = std::io::stdout().flush();
        rx.await.unwrap_or_default()
    }

    /// Input has ended. Open and future prompts resolve as unanswered.
    pub fn close(&self) {
        if let Ok(mut guard) = self.waiting.lock() {
            guard.take();
        }
    }

    fn describe(&self, p: &Proposal) -> String {
        let dest = if p.result.is_unsorted() {
            "(unsorted)".to_string()
        } else {
            p.result.destination.clone()
        };
        format!(
            "{} → {} [{:.0}%] {}",
            p.file.name,
            dest,
            p.final_confidence * 100.0,
            p.result.rationale
        )
    }

    fn menu(&self) -> String {
        let mut out = String::new();
        for (i, d) in self.destinations.iter().enumerate() {
            out.push_str(&format!("  {}) {}\n", i + 1, d));
        }
        out.push_str("  a) accept  d) dismiss  enter) ignore");
        out
    }

    async fn prompt_one(&self, p: &Proposal) -> UserDecision {
        println!("\n{}", self.describe(p));
        println!("{}", self.menu());
        loop {
            let line = self.ask(">").await;
            match parse_decision(&line, &self.destinations) {
                Some(decision) => return decision,
                None => println!("'{}' is not a destination; pick a number from the list", line.trim()),
            }
        }
    }
}

#[async_trait::async_trait]
impl DecisionSurface for Console {
    async fn present(&self, proposal: &Proposal) -> UserDecision {
        let _turn = self.turn.lock().await;
        self.prompt_one(proposal).await
    }

    async fn present_batch(&self, proposals: &[Proposal]) -> Vec<UserDecision> {
        let _turn = self.turn.lock().await;
        println!("\n{} files arrived together:", proposals.len());
        for p in proposals {
            println!("  {}", self.describe(p));
        }
        let line = self
            .ask("a) accept all  d) dismiss all  r) review each  enter) ignore >")
            .await;
        match line.trim().to_ascii_lowercase().as_str() {
            "a" | "y" | "accept" => vec![UserDecision::Accept; proposals.len()],
            "d" | "dismiss" => vec![UserDecision::Dismiss; proposals.len()],
            "r" | "review" => {
                let mut out = Vec::with_capacity(proposals.len());
                for p in proposals {
                    out.push(self.prompt_one(p).await);
                }
                out
            }
            _ => vec![UserDecision::IgnoreQuietly; proposals.len()],
        }
    }

    async fn resolve_collision(&self, file: &FileEvent, target: &Path) -> ConflictPolicy {
        println!("{} already exists at {}", file.name, target.display());
        parse_collision(&self.ask("r) replace  k) keep both  s) skip >").await)
    }

    fn notify(&self, notice: &Notice) {
        match notice {
            Notice::Moved { from, to, .. } => {
                println!("moved {} → {}  (u to undo)", from.display(), to.display())
            }
            Notice::Waiting { source, phase } => {
                let when = match phase {
                    Phase::Quick => "retrying shortly",
                    Phase::Patient => "will keep trying",
                };
                println!("{} is in use, {}", source.display(), when);
            }
            Notice::Skipped { file, rationale } => {
                println!("skipped {} ({})", file.name, rationale)
            }
            Notice::GaveUp { source, reason } => {
                println!("left {} in place: {}", source.display(), reason)
            }
        }
    }
}

/// Route stdin lines: answers to prompts, everything else to the session.
pub async fn drive(
    console: Arc<Console>,
    mut lines: mpsc::Receiver<String>,
    commands: mpsc::Sender<SessionCommand>,
) {
    while let Some(line) = lines.recv().await {
        let Some(line) = console.offer(line) else {
            continue;
        };
        let Some(cmd) = parse_command(&line) else {
            if !line.trim().is_empty() {
                println!("{}", HELP);
            }
            continue;
        };
        debug!(?cmd, "console command");
        let sent = match cmd {
            ConsoleCommand::Undo => {
                let (tx, rx) = oneshot::channel();
                let sent = commands.send(SessionCommand::Undo(tx)).await.is_ok();
                match rx.await {
                    Ok(Ok(entry)) => println!(
                        "undone: {} is back in {}",
                        entry.original_filename.as_deref().unwrap_or(&entry.filename),
                        entry.source
                    ),
                    Ok(Err(e)) => println!("cannot undo: {}", e),
                    Err(_) => {}
                }
                sent
            }
            ConsoleCommand::Skipped => {
                let (tx, rx) = oneshot::channel();
                let sent = commands.send(SessionCommand::ListSkipped(tx)).await.is_ok();
                if let Ok(skipped) = rx.await {
                    if skipped.is_empty() {
                        println!("nothing skipped");
                    }
                    for (i, s) in skipped.iter().enumerate() {
                        println!("  {}) {} ({})", i + 1, s.file.name, s.result.rationale);
                    }
                }
                sent
            }
            ConsoleCommand::Rescue(n) => {
                let (tx, rx) = oneshot::channel();
                let mut sent = commands.send(SessionCommand::ListSkipped(tx)).await.is_ok();
                match rx.await.ok().and_then(|s| n.checked_sub(1).and_then(|i| s.into_iter().nth(i))) {
                    Some(s) => {
                        sent = commands
                            .send(SessionCommand::Rescue(s.file.path))
                            .await
                            .is_ok();
                    }
                    None => println!("no skipped file #{}", n),
                }
                sent
            }
            ConsoleCommand::Flush => commands.send(SessionCommand::Flush).await.is_ok(),
            ConsoleCommand::Quit => {
                let _ = commands.send(SessionCommand::Shutdown).await;
                false
            }
            ConsoleCommand::Help => {
                println!("{}", HELP);
                true
            }
        };
        if !sent {
            break;
        }
    }
    console.close();
}

/// Forward stdin lines from a plain thread so a pending read never holds up shutdown.
pub fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(32);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut line = String::new();
        loop {
            line.clear();
            match stdin.read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let trimmed = line.trim_end_matches(['\r', '\n']).to_string();
                    if tx.blocking_send(trimmed).is_err() {
                        break;
                    }
                }
            }
        }
    });
    rx
}
