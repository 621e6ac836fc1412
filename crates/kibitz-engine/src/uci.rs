//! UCI engine driven as a child process.

use std::{collections::HashSet, process::Stdio, time::Duration};

use async_trait::async_trait;
use kibitz_types::{board::Side, config::EngineConfig, score::Score};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    process::{Child, ChildStdin, ChildStdout, Command},
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::{EngineCallError, Evaluation, SearchEngine};

const DRAIN_AFTER_STOP: Duration = Duration::from_millis(300);
const QUIT_GRACE: Duration = Duration::from_millis(500);

/// Fields collected from `info` lines of one search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InfoSnapshot {
    pub depth: Option<u32>,
    pub score: Option<Score>,
    pub pv_head: Option<String>,
}

/// Folds one `info` line into `out`. Secondary PV lines and bound-only
/// scores are ignored.
pub fn parse_info_line(line: &str, out: &mut InfoSnapshot) {
    let mut tokens = line.split_whitespace();
    if tokens.next() != Some("info") {
        return;
    }
    let mut depth = None;
    let mut score = None;
    let mut pv_head = None;
    let mut bounded = false;
    while let Some(token) = tokens.next() {
        match token {
            "depth" => depth = tokens.next().and_then(|v| v.parse().ok()),
            "multipv" => {
                if tokens.next() != Some("1") {
                    return;
                }
            }
            "score" => {
                score = match (tokens.next(), tokens.next().and_then(|v| v.parse().ok())) {
                    (Some("cp"), Some(v)) => Some(Score::Centipawns(v)),
                    (Some("mate"), Some(v)) => Some(Score::Mate(v)),
                    _ => None,
                };
            }
            "lowerbound" | "upperbound" => bounded = true,
            "pv" => {
                pv_head = tokens.next().map(str::to_string);
                break;
            }
            "string" => return,
            _ => {}
        }
    }
    if bounded {
        return;
    }
    if depth.is_some() {
        out.depth = depth;
    }
    if let Some(score) = score {
        out.score = Some(score);
    }
    if pv_head.is_some() {
        out.pv_head = pv_head;
    }
}

struct UciProcess {
    child: Child,
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
    options: HashSet<String>,
    name: Option<String>,
}

impl UciProcess {
    async fn spawn(config: &EngineConfig) -> Result<Self, EngineCallError> {
        let mut child = Command::new(&config.path)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| EngineCallError::Spawn {
                path: config.path.clone(),
                source,
            })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineCallError::Protocol("engine stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineCallError::Protocol("engine stdout unavailable".into()))?;
        Ok(Self {
            child,
            stdin,
            lines: BufReader::new(stdout).lines(),
            options: HashSet::new(),
            name: None,
        })
    }

    async fn send(&mut self, command: &str) -> Result<(), EngineCallError> {
        debug!("uci <- {command}");
        self.stdin.write_all(command.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn read_line(&mut self) -> Result<String, EngineCallError> {
        match self.lines.next_line().await? {
            Some(line) => {
                debug!("uci -> {line}");
                Ok(line)
            }
            None => Err(EngineCallError::Exited),
        }
    }

    async fn handshake(&mut self, config: &EngineConfig) -> Result<(), EngineCallError> {
        self.send("uci").await?;
        loop {
            let line = self.read_line().await?;
            if let Some(rest) = line.strip_prefix("id name ") {
                self.name = Some(rest.trim().to_string());
            } else if let Some(name) = parse_option_name(&line) {
                self.options.insert(name);
            } else if line.trim() == "uciok" {
                break;
            }
        }
        self.set_option_if_available("Threads", &config.threads.to_string())
            .await?;
        self.set_option_if_available("Hash", &config.hash_mb.to_string())
            .await?;
        self.sync_ready().await?;
        self.send("ucinewgame").await?;
        self.sync_ready().await
    }

    async fn set_option_if_available(
        &mut self,
        name: &str,
        value: &str,
    ) -> Result<(), EngineCallError> {
        if self.options.contains(name) {
            self.send(&format!("setoption name {name} value {value}"))
                .await?;
        }
        Ok(())
    }

    async fn sync_ready(&mut self) -> Result<(), EngineCallError> {
        self.send("isready").await?;
        while self.read_line().await?.trim() != "readyok" {}
        Ok(())
    }

    async fn search(&mut self, fen: &str, budget: Duration) -> Result<InfoSnapshot, EngineCallError> {
        self.send(&format!("position fen {fen}")).await?;
        self.send(&format!("go movetime {}", budget.as_millis().max(1)))
            .await?;
        let mut info = InfoSnapshot::default();
        loop {
            let line = self.read_line().await?;
            if line.starts_with("info ") {
                parse_info_line(&line, &mut info);
            } else if let Some(rest) = line.strip_prefix("bestmove") {
                let best = rest.split_whitespace().next().filter(|m| *m != "(none)");
                if let Some(best) = best {
                    info.pv_head = Some(best.to_string());
                }
                return Ok(info);
            }
        }
    }

    async fn drain_until_bestmove(&mut self) -> bool {
        let drained = timeout(DRAIN_AFTER_STOP, async {
            loop {
                match self.read_line().await {
                    Ok(line) if line.starts_with("bestmove") => return true,
                    Ok(_) => continue,
                    Err(_) => return false,
                }
            }
        })
        .await;
        matches!(drained, Ok(true))
    }

    async fn shutdown(mut self) {
        let _ = self.send("quit").await;
        if timeout(QUIT_GRACE, self.child.wait()).await.is_err() {
            warn!("Engine ignored quit; killing process");
            let _ = self.child.kill().await;
        }
    }
}

fn parse_option_name(line: &str) -> Option<String> {
    let rest = line.strip_prefix("option name ")?;
    let name = match rest.find(" type ") {
        Some(end) => &rest[..end],
        None => rest,
    };
    Some(name.trim().to_string()).filter(|name| !name.is_empty())
}

/// External UCI engine. One process per start/stop cycle; a process that
/// stops answering is discarded and respawned on the next call.
pub struct UciEngine {
    config: EngineConfig,
    process: Option<UciProcess>,
}

impl UciEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            process: None,
        }
    }

    fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.config.call_timeout_ms)
    }

    async fn launch(&self) -> Result<UciProcess, EngineCallError> {
        let mut process = UciProcess::spawn(&self.config).await?;
        match timeout(self.call_timeout(), process.handshake(&self.config)).await {
            Ok(Ok(())) => {
                info!(
                    "Engine ready: {} ({} options)",
                    process.name.as_deref().unwrap_or(&self.config.path),
                    process.options.len()
                );
                Ok(process)
            }
            Ok(Err(err)) => {
                process.shutdown().await;
                Err(err)
            }
            Err(_) => {
                process.shutdown().await;
                Err(EngineCallError::Timeout(self.call_timeout()))
            }
        }
    }
}

#[async_trait]
impl SearchEngine for UciEngine {
    async fn start(&mut self) -> Result<(), EngineCallError> {
        if self.process.is_none() {
            self.process = Some(self.launch().await?);
        }
        Ok(())
    }

    async fn evaluate(
        &mut self,
        fen: &str,
        budget: Duration,
    ) -> Result<Evaluation, EngineCallError> {
        let perspective = Side::from_fen(fen)
            .ok_or_else(|| EngineCallError::Protocol(format!("no side to move in {fen:?}")))?;
        if self.process.is_none() {
            warn!("Engine not running; respawning before evaluation");
            self.process = Some(self.launch().await?);
        }
        let limit = self.call_timeout();
        let process = self.process.as_mut().ok_or(EngineCallError::NotStarted)?;

        let outcome = timeout(limit, process.search(fen, budget)).await;
        let info = match outcome {
            Ok(Ok(info)) => info,
            Ok(Err(err)) => {
                if let Some(dead) = self.process.take() {
                    dead.shutdown().await;
                }
                return Err(err);
            }
            Err(_) => {
                let recovered = process.send("stop").await.is_ok()
                    && process.drain_until_bestmove().await;
                if !recovered {
                    if let Some(stuck) = self.process.take() {
                        stuck.shutdown().await;
                    }
                }
                return Err(EngineCallError::Timeout(limit));
            }
        };

        let score = info
            .score
            .ok_or_else(|| EngineCallError::NoScore(fen.to_string()))?;
        Ok(Evaluation {
            score,
            perspective,
            principal_move: info.pv_head,
            depth: info.depth,
        })
    }

    async fn stop(&mut self) -> Result<(), EngineCallError> {
        if let Some(process) = self.process.take() {
            process.shutdown().await;
            info!("Engine stopped");
        }
        Ok(())
    }
}
