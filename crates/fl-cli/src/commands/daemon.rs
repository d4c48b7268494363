//! Long-running monitor driven by JSON messages on stdin.
//!
//! One message per line, tagged by `type`:
//!
//! ```json
//! {"type":"start"}
//! {"type":"signal","signal":"will_resign_active","at":"2025-03-10T09:05:00Z"}
//! {"type":"usage","app_id":"com.apple.dt.Xcode","app_name":"Xcode",
//!  "started_at":"2025-03-10T09:00:00Z","ended_at":"2025-03-10T09:40:00Z"}
//! {"type":"tick"}
//! {"type":"stats","date":"2025-03-10"}
//! {"type":"stop"}
//! ```
//!
//! Replies and detection events are written to stdout as JSON lines. While
//! monitoring, background ticks fire on the interval requested from the
//! timer runtime. Statistics are served from a cache that lives as long as
//! the daemon and is invalidated by every write.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use fl_core::stats::{FocusSummary, UsageStatistics};
use fl_core::{
    AppSession, BackgroundTicker, DetectorState, EventSink, FocusMonitor, FocusSession,
    InvalidatingStore, LifecycleSignal, StartOutcome, StatisticsService, StatsCache, Store,
    TickReport, UsageEvent, UsageEventSource, Validator, Verdict,
};
use fl_db::Database;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use super::tick::{self, TimerRuntime};
use super::util::WriteLock;
use crate::Config;

/// Inbound daemon messages.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    Start {
        #[serde(default)]
        at: Option<DateTime<Utc>>,
    },
    Stop,
    Signal {
        signal: LifecycleSignal,
        #[serde(default)]
        at: Option<DateTime<Utc>>,
    },
    /// Queued and recorded by the next tick.
    Usage(UsageEvent),
    /// Runs a tick now.
    Tick,
    Stats {
        #[serde(default)]
        date: Option<NaiveDate>,
    },
}

/// Outbound replies and events.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Reply<'a> {
    Started {
        outcome: StartOutcome,
        next_tick_at: Option<DateTime<Utc>>,
    },
    Stopped {
        from: DetectorState,
    },
    Transition {
        signal: LifecycleSignal,
        from: DetectorState,
        to: DetectorState,
        #[serde(skip_serializing_if = "Option::is_none")]
        rejected: Option<String>,
    },
    Queued {
        pending: usize,
    },
    Tick(&'a TickReport),
    Stats {
        usage: UsageStatistics,
        focus: FocusSummary,
    },
    FocusSession(&'a FocusSession),
    AppUsage(&'a AppSession),
    Error {
        message: String,
    },
}

/// Usage events waiting for the next tick.
///
/// Cloned handles share one queue, so the tick worker can drain it from
/// another thread.
#[derive(Debug, Clone, Default)]
pub struct SharedQueue(Arc<Mutex<VecDeque<UsageEvent>>>);

impl SharedQueue {
    fn lock(&self) -> MutexGuard<'_, VecDeque<UsageEvent>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends an event and returns the queue length.
    pub fn push(&self, event: UsageEvent) -> usize {
        let mut queue = self.lock();
        queue.push_back(event);
        queue.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl UsageEventSource for SharedQueue {
    fn next_event(&mut self) -> Option<UsageEvent> {
        self.lock().pop_front()
    }
}

/// An [`EventSink`] writing one JSON object per line.
pub struct JsonLinesSink<W> {
    writer: Mutex<W>,
}

impl<W: Write> JsonLinesSink<W> {
    pub const fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn emit<T: Serialize>(&self, value: &T) -> Result<()> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        serde_json::to_writer(&mut *writer, value).context("failed to serialize reply")?;
        writeln!(writer)?;
        writer.flush()?;
        Ok(())
    }
}

impl<W: Write> EventSink for JsonLinesSink<W> {
    fn on_focus_session_detected(&self, session: &FocusSession) {
        if let Err(err) = self.emit(&Reply::FocusSession(session)) {
            tracing::warn!(error = %err, "failed to emit focus session");
        }
    }

    fn on_app_usage_detected(&self, session: &AppSession) {
        if let Err(err) = self.emit(&Reply::AppUsage(session)) {
            tracing::warn!(error = %err, "failed to emit app usage");
        }
    }
}

/// The daemon's state: one database connection, the statistics cache and
/// the tick schedule.
pub struct Daemon<W: Write> {
    config: Config,
    db: Database,
    cache: StatsCache,
    sink: JsonLinesSink<W>,
    queue: SharedQueue,
    runtime: TimerRuntime,
}

impl<W: Write> Daemon<W> {
    /// Opens the database and resumes any tick the previous process
    /// requested.
    pub fn open(config: Config, writer: W) -> Result<Self> {
        let db = Database::open(&config.database_path).context("failed to open database")?;
        let mut runtime = TimerRuntime::registered();
        let snapshot = db.load_detector()?.unwrap_or_default();
        if snapshot.state != DetectorState::Idle {
            if let Some(at) = snapshot.next_tick_at {
                runtime.request_at(at);
            }
        }
        let cache = StatsCache::new(config.cache_ttl());
        Ok(Self {
            config,
            db,
            cache,
            sink: JsonLinesSink::new(writer),
            queue: SharedQueue::default(),
            runtime,
        })
    }

    /// Returns the output writer.
    pub fn into_writer(self) -> W {
        self.sink.into_inner()
    }

    /// When the next background tick is due, if monitoring.
    pub const fn next_tick_at(&self) -> Option<DateTime<Utc>> {
        self.runtime.requested()
    }

    fn validator(&self) -> Validator {
        Validator::new(self.config.validation_rules())
    }

    fn lock(&self) -> Result<WriteLock> {
        WriteLock::acquire(&self.config.lock_path())
    }

    /// Reads messages until `input` closes, running ticks as they fall due.
    pub async fn serve<R: AsyncBufRead + Unpin>(&mut self, input: R) -> Result<()> {
        let mut lines = input.lines();
        loop {
            let due = self.next_tick_at();
            let wait = async move {
                match due {
                    Some(at) => {
                        let delay = (at - Utc::now()).to_std().unwrap_or_default();
                        tokio::time::sleep(delay).await;
                    }
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                line = lines.next_line() => {
                    match line.context("failed to read input")? {
                        Some(line) => self.handle_line(&line, Utc::now()).await?,
                        None => break,
                    }
                }
                () = wait => self.tick(Utc::now()).await?,
            }
        }
        tracing::info!("input closed; daemon exiting");
        Ok(())
    }

    /// Parses and handles one input line. Bad input is answered with an
    /// error reply.
    pub async fn handle_line(&mut self, line: &str, now: DateTime<Utc>) -> Result<()> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }
        match serde_json::from_str::<Message>(line) {
            Ok(message) => self.handle(message, now).await,
            Err(err) => {
                tracing::warn!(error = %err, "ignoring malformed message");
                self.sink.emit(&Reply::Error {
                    message: format!("invalid message: {err}"),
                })
            }
        }
    }

    /// Handles one message. Store failures are reported as error replies;
    /// only output failures end the daemon.
    pub async fn handle(&mut self, message: Message, now: DateTime<Utc>) -> Result<()> {
        let result = match message {
            Message::Start { at } => self.start(at.unwrap_or(now)),
            Message::Stop => self.stop(),
            Message::Signal { signal, at } => self.signal(signal, at.unwrap_or(now)),
            Message::Usage(event) => {
                let pending = self.queue.push(event);
                self.sink.emit(&Reply::Queued { pending })
            }
            Message::Tick => self.tick(now).await,
            Message::Stats { date } => self.stats(date, now),
        };
        if let Err(err) = result {
            tracing::warn!(error = %err, "message failed");
            self.sink.emit(&Reply::Error {
                message: format!("{err:#}"),
            })?;
        }
        Ok(())
    }

    fn start(&mut self, at: DateTime<Utc>) -> Result<()> {
        let _lock = self.lock()?;
        let store = InvalidatingStore::new(&self.db, &self.cache);
        let outcome = FocusMonitor::new(&store, &self.sink, self.validator())
            .with_capabilities(self.config.capabilities())
            .start(at)?;
        if outcome == StartOutcome::Started {
            let ticker = BackgroundTicker::new(&store, &self.sink, self.validator())
                .with_interval(self.config.tick_interval())
                .with_budget(self.config.tick_budget());
            if let Err(err) = ticker.install(&mut self.runtime, at) {
                tracing::warn!(error = %err, "failed to schedule first tick");
            }
        }
        self.sink.emit(&Reply::Started {
            outcome,
            next_tick_at: self.runtime.requested(),
        })
    }

    fn stop(&mut self) -> Result<()> {
        let _lock = self.lock()?;
        let store = InvalidatingStore::new(&self.db, &self.cache);
        let transition = FocusMonitor::new(&store, &self.sink, self.validator()).stop()?;
        self.runtime.cancel();
        self.sink.emit(&Reply::Stopped {
            from: transition.from,
        })
    }

    fn signal(&mut self, signal: LifecycleSignal, at: DateTime<Utc>) -> Result<()> {
        let _lock = self.lock()?;
        let store = InvalidatingStore::new(&self.db, &self.cache);
        let outcome = FocusMonitor::new(&store, &self.sink, self.validator())
            .with_capabilities(self.config.capabilities())
            .handle_signal(signal, at)?;
        let rejected = match outcome.verdict {
            Some(Verdict::Rejected(rejection)) => Some(rejection.to_string()),
            _ => None,
        };
        self.sink.emit(&Reply::Transition {
            signal,
            from: outcome.transition.from,
            to: outcome.transition.to,
            rejected,
        })
    }

    async fn tick(&mut self, now: DateTime<Utc>) -> Result<()> {
        let _lock = self.lock()?;
        let result = tick::run_bounded(
            self.config.database_path.clone(),
            &self.config,
            self.runtime.clone(),
            self.queue.clone(),
            now,
        )
        .await;
        // The tick wrote through its own connection.
        self.cache.invalidate();

        match result {
            Ok(run) => {
                self.runtime = run.runtime;
                if !self.monitoring()? {
                    self.runtime.cancel();
                }
                run.events.forward(&self.sink);
                self.sink.emit(&Reply::Tick(&run.report))
            }
            Err(err) => {
                let retry = now
                    + chrono::Duration::from_std(self.config.tick_interval())
                        .unwrap_or_else(|_| chrono::Duration::minutes(15));
                tracing::warn!(error = %err, %retry, "tick failed");
                if self.monitoring()? {
                    self.runtime.request_at(retry);
                }
                Err(err)
            }
        }
    }

    fn monitoring(&self) -> Result<bool> {
        let snapshot = self.db.load_detector()?.unwrap_or_default();
        Ok(snapshot.state != DetectorState::Idle)
    }

    fn stats(&self, date: Option<NaiveDate>, now: DateTime<Utc>) -> Result<()> {
        let service = StatisticsService::new(&self.db, &self.cache).as_of(now);
        let date = date.unwrap_or_else(|| service.today());
        self.sink.emit(&Reply::Stats {
            usage: service.usage_statistics(date),
            focus: service.focus_summary(date),
        })
    }
}

/// `fl daemon`: serves stdin until it closes.
pub fn run(config: Config) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .context("failed to initialize tokio runtime")?;
    let mut daemon = Daemon::open(config, std::io::stdout())?;
    runtime.block_on(async {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        daemon.serve(stdin).await
    })
}
