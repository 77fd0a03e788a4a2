//! Debugger: routes host debug requests and owns the session lifecycle.
//!
//! A request goes through three independent stages, in order:
//!
//! 1. **Pre-processing**: `initialize` starts the session if needed.
//! 2. **Dispatch**: while started, the request header crosses the sync
//!    channel, then the command goes to its handler or straight to the
//!    engine.
//! 3. **Override**: `debugInfo` and `inspectVariables` are answered locally
//!    whatever the session state; `disconnect` stops the session and
//!    replaces whatever stage 2 produced.
//!
//! A single request can pass through stage 2 and still be overridden in
//! stage 3 (`disconnect` while started is forwarded, then answered locally).

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use nbdebug_core::{
    BridgeConfig, CellFiles, EventStore, ExecutionReply, Interpreter, SessionState, protocol,
    system,
};
use nbdebug_transport::{EngineWorker, ProxyEndpoints, TransportError, WorkerHandle, bind};
use serde_json::{Value, json};

use crate::{BridgeError, handlers};

/// Logical channel name of the primary proxy endpoint.
pub const CONTROL_CHANNEL: &str = "debugger";

/// Logical channel name of the sync proxy endpoint.
pub const HEADER_CHANNEL: &str = "debugger_header";

/// Where the engine listens and where the proxy channels are bound.
///
/// Chosen once when the debugger is created and reused by every session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineEndpoint {
    /// Loopback host of the engine.
    pub host: String,
    /// Port the engine is told to listen on.
    pub port: u16,
    /// Name of the primary proxy endpoint.
    pub control: String,
    /// Name of the sync proxy endpoint.
    pub header: String,
}

impl EngineEndpoint {
    /// `host:port` of the engine.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Resources that only exist while a session is started.
struct ActiveSession {
    proxy: ProxyEndpoints,
    worker: WorkerHandle,
}

/// Debug-session bridge between a notebook host and an out-of-process engine.
pub struct Debugger {
    config: BridgeConfig,
    interpreter: Arc<dyn Interpreter>,
    endpoint: EngineEndpoint,
    cell_files: CellFiles,
    state: Arc<SessionState>,
    events: Arc<EventStore>,
    active: Option<ActiveSession>,
}

impl Debugger {
    /// Create a debugger. Picks the engine port now; no session is started.
    ///
    /// # Errors
    /// Returns error if no free port is found in the configured range.
    pub fn new(config: BridgeConfig, interpreter: Arc<dyn Interpreter>) -> Result<Self, BridgeError> {
        let port = match config.engine_port {
            Some(port) => port,
            None => system::find_free_port(
                config.port_max_tries,
                config.port_range_start,
                config.port_range_end,
            )
            .ok_or(BridgeError::NoFreePort {
                start: config.port_range_start,
                end: config.port_range_end,
            })?,
        };

        let endpoint = EngineEndpoint {
            host: config.host.clone(),
            port,
            control: system::endpoint_name(CONTROL_CHANNEL),
            header: system::endpoint_name(HEADER_CHANNEL),
        };
        let cell_files = CellFiles::from_config(&config);

        Ok(Self {
            config,
            interpreter,
            endpoint,
            cell_files,
            state: Arc::new(SessionState::new()),
            events: Arc::new(EventStore::new()),
            active: None,
        })
    }

    /// Whether a session is running.
    #[must_use]
    pub const fn is_started(&self) -> bool {
        self.active.is_some()
    }

    /// Engine and proxy endpoints of this debugger.
    #[must_use]
    pub const fn endpoint(&self) -> &EngineEndpoint {
        &self.endpoint
    }

    /// Local bookkeeping of the current session.
    #[must_use]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Engine events published to the host.
    #[must_use]
    pub fn events(&self) -> Arc<EventStore> {
        Arc::clone(&self.events)
    }

    /// Cell file naming scheme.
    #[must_use]
    pub const fn cell_files(&self) -> &CellFiles {
        &self.cell_files
    }

    /// Process one host request and produce the reply.
    ///
    /// `header` is the host message header; it only travels the sync
    /// channel. Requests are handled one at a time.
    ///
    /// # Errors
    /// Returns error if an engine round-trip fails or its reply is not JSON,
    /// or if starting the session fails. The session stays started after a
    /// failed round-trip, except for `disconnect`, which always stops it.
    pub async fn process_request(
        &mut self,
        header: &Value,
        message: &Value,
    ) -> Result<Value, BridgeError> {
        let command = protocol::command(message);
        let mut reply = protocol::empty_reply();

        if command == "initialize" {
            if self.is_started() {
                tracing::info!("The debugger has already started");
            } else {
                self.start().await?;
                tracing::info!("The debugger has started");
            }
        }

        if let Some(active) = &self.active {
            let forwarded = match active.proxy.sync_header(header).await {
                Ok(()) => self.dispatch(command, message).await,
                Err(e) => Err(e.into()),
            };
            match forwarded {
                Ok(forwarded) => reply = forwarded,
                // The session is torn down below whatever the engine did.
                Err(e) if command == "disconnect" => {
                    tracing::warn!("Engine did not acknowledge disconnect: {e}");
                }
                Err(e) => return Err(e),
            }
        }

        match command {
            "debugInfo" => {
                reply = handlers::debug_info(message, self.is_started(), &self.cell_files, &self.state);
            }
            "inspectVariables" => {
                reply = handlers::inspect_variables(message, self.interpreter.as_ref());
            }
            "disconnect" => {
                self.stop().await;
                tracing::info!("The debugger has stopped");
                reply = protocol::success(message, json!({}));
            }
            _ => {}
        }

        Ok(reply)
    }

    async fn dispatch(&self, command: &str, message: &Value) -> Result<Value, BridgeError> {
        let reply = match command {
            "dumpCell" => handlers::dump_cell(&self.cell_files, message).await,
            "setBreakpoints" => {
                handlers::record_breakpoints(&self.state, message);
                self.forward_message(message).await?
            }
            "source" => handlers::source(message).await,
            "stackTrace" => {
                let mut reply = self.forward_message(message).await?;
                handlers::filter_stack_trace(&mut reply, cfg!(windows));
                reply
            }
            "variables" => {
                let mut reply = self.forward_message(message).await?;
                handlers::paginate_variables(message, &mut reply);
                reply
            }
            _ => self.forward_message(message).await?,
        };
        Ok(reply)
    }

    /// Send `message` to the engine verbatim and return its parsed reply.
    ///
    /// # Errors
    /// Returns error if no session is started, the round-trip fails, or the
    /// reply is not valid JSON.
    pub async fn forward_message(&self, message: &Value) -> Result<Value, BridgeError> {
        let active = self
            .active
            .as_ref()
            .ok_or(TransportError::WorkerGone)?;
        let raw = active.proxy.forward(message).await?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Start a session: bring the engine up in the interpreter, bind the
    /// proxy channels, spawn the engine worker and wait until it is ready.
    ///
    /// Starting an already started debugger is a logged no-op.
    ///
    /// # Errors
    /// Returns error if directories cannot be created, the worker cannot
    /// reach the engine, or the engine failed to start and
    /// `abort_on_engine_start_failure` is set.
    pub async fn start(&mut self) -> Result<(), BridgeError> {
        if self.is_started() {
            tracing::info!("The debugger has already started");
            return Ok(());
        }

        let log_dir = self.log_dir();
        tokio::fs::create_dir_all(&log_dir).await?;

        // The engine's listener has to be enabled from the interpreter's main thread.
        let code = attach_snippet(&self.endpoint.host, self.endpoint.port, &log_dir);
        self.bring_up_engine(&code).await?;

        let (proxy, worker_side) = bind(
            self.endpoint.control.clone(),
            self.endpoint.header.clone(),
            self.config.request_timeout(),
        );
        let worker = EngineWorker::spawn(
            self.endpoint.address(),
            worker_side,
            Arc::clone(&self.state),
            Arc::clone(&self.events),
        );

        if let Err(e) = proxy.handshake().await {
            worker.stop().await;
            return Err(e.into());
        }
        if let Err(e) = self.cell_files.ensure_dir().await {
            drop(proxy);
            worker.stop().await;
            return Err(e.into());
        }

        self.active = Some(ActiveSession { proxy, worker });
        Ok(())
    }

    async fn bring_up_engine(&self, code: &str) -> Result<(), BridgeError> {
        let reply = match self.interpreter.execute(code).await {
            Ok(reply) if reply.is_ok() => return Ok(()),
            Ok(reply) => reply,
            Err(e) => ExecutionReply::error("InterpreterError", e.to_string(), Vec::new()),
        };

        tracing::error!("Exception raised when trying to start the debug engine");
        for line in &reply.traceback {
            tracing::error!("{line}");
        }
        tracing::error!("{} - {}", reply.ename, reply.evalue);

        if self.config.abort_on_engine_start_failure {
            return Err(BridgeError::EngineStart {
                ename: reply.ename,
                evalue: reply.evalue,
            });
        }
        Ok(())
    }

    /// Stop the session: unbind the proxy channels, join the engine worker,
    /// forget breakpoints and stopped threads.
    ///
    /// Stopping a debugger that is not started only clears the state.
    pub async fn stop(&mut self) {
        if let Some(ActiveSession { proxy, worker }) = self.active.take() {
            drop(proxy);
            worker.stop().await;
        }
        self.state.clear();
    }

    fn log_dir(&self) -> PathBuf {
        system::temp_directory_path(&self.config).join(format!(
            "{}{}",
            self.config.log_dir_prefix,
            system::current_pid()
        ))
    }
}

/// Code that makes the engine listen for the worker inside the interpreter.
fn attach_snippet(host: &str, port: u16, log_dir: &Path) -> String {
    format!(
        "import ptvsd\nptvsd.enable_attach(('{host}',{port}), log_dir='{}')",
        log_dir.display()
    )
}
