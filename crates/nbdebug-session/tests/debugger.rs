//! End-to-end tests: a `Debugger` against an in-process fake engine.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use nbdebug_core::{
    BridgeConfig, ExecutionReply, GlobalValue, GlobalVariable, Interpreter, InterpreterError,
};
use nbdebug_session::{BridgeError, Debugger};
use nbdebug_transport::{FrameDecoder, TransportError, encode_frame};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::mpsc,
};

/// Interpreter that records executed code and answers with a canned reply.
struct FakeInterpreter {
    executed: Mutex<Vec<String>>,
    reply: ExecutionReply,
}

impl FakeInterpreter {
    fn new(reply: ExecutionReply) -> Arc<Self> {
        Arc::new(Self {
            executed: Mutex::new(Vec::new()),
            reply,
        })
    }

    fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Interpreter for FakeInterpreter {
    async fn execute(&self, code: &str) -> Result<ExecutionReply, InterpreterError> {
        self.executed.lock().unwrap().push(code.to_string());
        Ok(self.reply.clone())
    }

    fn globals(&self) -> Vec<GlobalVariable> {
        vec![
            GlobalVariable {
                name: "x".to_string(),
                value: GlobalValue::Json(json!(42)),
            },
            GlobalVariable {
                name: "os".to_string(),
                value: GlobalValue::Repr("<module 'os'>".to_string()),
            },
        ]
    }
}

fn response(request: &Value, body: Value) -> Value {
    json!({
        "seq": 1000,
        "type": "response",
        "request_seq": request["seq"],
        "success": true,
        "command": request["command"],
        "body": body,
    })
}

fn event(name: &str, thread_id: i64) -> Value {
    json!({"seq": 2000, "type": "event", "event": name, "body": {"threadId": thread_id}})
}

async fn write_json(stream: &mut TcpStream, message: &Value) {
    write_raw(stream, &serde_json::to_vec(message).unwrap()).await;
}

async fn write_raw(stream: &mut TcpStream, payload: &[u8]) {
    let frame: Bytes = encode_frame(payload);
    stream.write_all(&frame).await.unwrap();
}

/// Engine that answers every request and reports what it received.
async fn serve_engine(mut stream: TcpStream, seen: mpsc::UnboundedSender<Value>) {
    let mut decoder = FrameDecoder::new();
    loop {
        let request: Value = loop {
            if let Some(frame) = decoder.next_frame().unwrap() {
                break serde_json::from_slice(&frame).unwrap();
            }
            match stream.read_buf(decoder.buffer_mut()).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
        };
        let _ = seen.send(request.clone());

        match request["command"].as_str().unwrap_or_default() {
            "stackTrace" => {
                let frames = json!({"stackFrames": [
                    {"id": 1, "name": "cell", "line": 2, "column": 1, "source": {"path": "/tmp/cell.py"}},
                    {"id": 2, "name": "<module>", "line": 1, "column": 1, "source": {"path": "<string>"}},
                    {"id": 3, "name": "run", "line": 9, "column": 1, "source": {"path": "/lib/runner.py"}},
                ], "totalFrames": 3});
                write_json(&mut stream, &response(&request, frames)).await;
            }
            "variables" => {
                let variables: Vec<Value> = (0..10)
                    .map(|i| json!({"name": format!("v{i}"), "value": i.to_string(), "variablesReference": 0}))
                    .collect();
                write_json(&mut stream, &response(&request, json!({"variables": variables}))).await;
            }
            "next" => {
                let thread_id = request["arguments"]["threadId"].as_i64().unwrap();
                write_json(&mut stream, &event("stopped", thread_id)).await;
                write_json(&mut stream, &response(&request, json!({}))).await;
            }
            "continue" => {
                let thread_id = request["arguments"]["threadId"].as_i64().unwrap();
                write_json(&mut stream, &event("continued", thread_id)).await;
                write_json(&mut stream, &response(&request, json!({"allThreadsContinued": false}))).await;
            }
            "garbage" => write_raw(&mut stream, b"{not json").await,
            _ => write_json(&mut stream, &response(&request, json!({}))).await,
        }
    }
}

struct Harness {
    debugger: Debugger,
    interpreter: Arc<FakeInterpreter>,
    seen: mpsc::UnboundedReceiver<Value>,
    _temp: TempDir,
    seq: i64,
}

impl Harness {
    async fn new() -> Self {
        Self::with_config(ExecutionReply::ok(), |config| config).await
    }

    async fn with_config(
        reply: ExecutionReply,
        configure: impl FnOnce(BridgeConfig) -> BridgeConfig,
    ) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (seen_tx, seen) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve_engine(stream, seen_tx.clone()));
            }
        });

        let temp = tempfile::tempdir().unwrap();
        let config = configure(
            BridgeConfig::default()
                .with_engine_port(port)
                .with_temp_dir(temp.path()),
        );
        let interpreter = FakeInterpreter::new(reply);
        let debugger = Debugger::new(config, interpreter.clone()).unwrap();

        Self {
            debugger,
            interpreter,
            seen,
            _temp: temp,
            seq: 0,
        }
    }

    async fn request(&mut self, command: &str, arguments: Value) -> Result<Value, BridgeError> {
        self.seq += 1;
        let header = json!({"msg_id": format!("msg-{}", self.seq), "msg_type": "debug_request"});
        let message = json!({
            "seq": self.seq,
            "type": "request",
            "command": command,
            "arguments": arguments,
        });
        self.debugger.process_request(&header, &message).await
    }

    async fn ok(&mut self, command: &str, arguments: Value) -> Value {
        self.request(command, arguments).await.unwrap()
    }

    async fn engine_saw(&mut self) -> Value {
        self.seen.recv().await.unwrap()
    }
}

#[tokio::test]
async fn test_debug_info_before_initialize() {
    let mut h = Harness::new().await;

    let reply = h.ok("debugInfo", json!({})).await;
    assert_eq!(reply["success"], true);
    assert_eq!(reply["request_seq"], 1);
    assert_eq!(reply["body"]["isStarted"], false);
    assert_eq!(reply["body"]["breakpoints"], json!([]));
    assert_eq!(reply["body"]["stoppedThreads"], json!([]));
    assert_eq!(reply["body"]["hashMethod"], "Murmur2");
    assert!(h.interpreter.executed().is_empty());
}

#[tokio::test]
async fn test_initialize_starts_once() {
    let mut h = Harness::new().await;
    let port = h.debugger.endpoint().port;

    let reply = h.ok("initialize", json!({"adapterID": "python"})).await;
    assert_eq!(reply["command"], "initialize");
    assert_eq!(reply["success"], true);
    assert!(h.debugger.is_started());
    assert_eq!(h.engine_saw().await["command"], "initialize");

    let executed = h.interpreter.executed();
    assert_eq!(executed.len(), 1);
    assert!(executed[0].contains(&format!("'127.0.0.1',{port}")));

    h.ok("initialize", json!({})).await;
    assert_eq!(h.interpreter.executed().len(), 1);
    assert!(h.debugger.is_started());
}

#[tokio::test]
async fn test_commands_are_not_forwarded_before_initialize() {
    let mut h = Harness::new().await;

    let reply = h.ok("threads", json!({})).await;
    assert_eq!(reply, json!({}));
    assert!(h.seen.try_recv().is_err());
}

#[tokio::test]
async fn test_dump_cell_is_idempotent() {
    let mut h = Harness::new().await;
    h.ok("initialize", json!({})).await;

    let first = h.ok("dumpCell", json!({"code": "a = 1\nprint(a)\n"})).await;
    let path = first["body"]["sourcePath"].as_str().unwrap().to_string();
    assert!(path.starts_with(h.debugger.cell_files().prefix()));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "a = 1\nprint(a)\n");

    let second = h.ok("dumpCell", json!({"code": "a = 1\nprint(a)\n"})).await;
    assert_eq!(second["body"]["sourcePath"], path.as_str());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "a = 1\nprint(a)\n");

    // Handled locally; only `initialize` reached the engine.
    assert_eq!(h.engine_saw().await["command"], "initialize");
    assert!(h.seen.try_recv().is_err());
}

#[tokio::test]
async fn test_set_breakpoints_replaces_and_forwards() {
    let mut h = Harness::new().await;
    h.ok("initialize", json!({})).await;
    h.engine_saw().await;

    let source = json!({"path": "/tmp/cell.py"});
    h.ok("setBreakpoints", json!({"source": source, "breakpoints": [{"line": 1}, {"line": 2}]}))
        .await;
    let reply = h
        .ok("setBreakpoints", json!({"source": source, "breakpoints": [{"line": 4}]}))
        .await;
    assert_eq!(reply["command"], "setBreakpoints");

    let forwarded = h.engine_saw().await;
    assert_eq!(forwarded["arguments"]["breakpoints"], json!([{"line": 1}, {"line": 2}]));
    assert_eq!(h.engine_saw().await["arguments"]["breakpoints"], json!([{"line": 4}]));

    let info = h.ok("debugInfo", json!({})).await;
    assert_eq!(info["body"]["isStarted"], true);
    assert_eq!(
        info["body"]["breakpoints"],
        json!([{"source": "/tmp/cell.py", "breakpoints": [{"line": 4}]}])
    );
}

#[tokio::test]
async fn test_stack_trace_hides_synthetic_frame() {
    let mut h = Harness::new().await;
    h.ok("initialize", json!({})).await;

    let reply = h.ok("stackTrace", json!({"threadId": 1})).await;
    let paths: Vec<&str> = reply["body"]["stackFrames"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["source"]["path"].as_str().unwrap())
        .collect();
    assert_eq!(paths, vec!["/tmp/cell.py", "/lib/runner.py"]);
}

#[tokio::test]
async fn test_variables_paging() {
    let mut h = Harness::new().await;
    h.ok("initialize", json!({})).await;

    let names = |reply: &Value| -> Vec<String> {
        reply["body"]["variables"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v["name"].as_str().unwrap().to_string())
            .collect()
    };

    let page = h
        .ok("variables", json!({"variablesReference": 7, "start": 2, "count": 3}))
        .await;
    assert_eq!(names(&page), vec!["v2", "v3", "v4"]);

    let tail = h
        .ok("variables", json!({"variablesReference": 7, "start": 5, "count": 0}))
        .await;
    assert_eq!(names(&tail).len(), 5);

    let all = h.ok("variables", json!({"variablesReference": 7})).await;
    assert_eq!(names(&all).len(), 10);
}

#[tokio::test]
async fn test_engine_events_track_stopped_threads() {
    let mut h = Harness::new().await;
    h.ok("initialize", json!({})).await;
    let events = h.debugger.events();

    h.ok("next", json!({"threadId": 1})).await;
    h.ok("next", json!({"threadId": 2})).await;
    h.ok("continue", json!({"threadId": 1})).await;

    let info = h.ok("debugInfo", json!({})).await;
    assert_eq!(info["body"]["stoppedThreads"], json!([2]));

    let history = events.history();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].event(), "stopped");
    // Events carry the header of the request that triggered them.
    assert_eq!(history[2].parent_header["msg_id"], "msg-4");
}

#[tokio::test]
async fn test_source_unavailable_while_started() {
    let mut h = Harness::new().await;
    h.ok("initialize", json!({})).await;

    let reply = h
        .ok("source", json!({"source": {"path": "<frozen importlib._bootstrap>"}}))
        .await;
    assert_eq!(reply["success"], false);
    assert_eq!(reply["message"], "source unavailable");
    assert_eq!(reply["body"], json!({}));
    assert!(h.debugger.is_started());
}

#[tokio::test]
async fn test_inspect_variables_without_session() {
    let mut h = Harness::new().await;

    let reply = h.ok("inspectVariables", json!({})).await;
    assert_eq!(
        reply["body"]["variables"],
        json!([
            {"name": "x", "variablesReference": 0, "value": 42},
            {"name": "os", "variablesReference": 0, "value": "<module 'os'>"},
        ])
    );
}

#[tokio::test]
async fn test_disconnect_overrides_engine_reply_and_stops() {
    let mut h = Harness::new().await;
    h.ok("initialize", json!({})).await;
    h.ok("setBreakpoints", json!({"source": {"path": "/tmp/a.py"}, "breakpoints": [{"line": 1}]}))
        .await;
    h.ok("next", json!({"threadId": 3})).await;

    let reply = h.ok("disconnect", json!({"restart": false})).await;
    assert_eq!(reply["type"], "response");
    assert_eq!(reply["command"], "disconnect");
    assert_eq!(reply["success"], true);
    assert_eq!(reply["body"], json!({}));
    assert!(!h.debugger.is_started());

    let mut commands = Vec::new();
    while let Ok(request) = h.seen.try_recv() {
        commands.push(request["command"].as_str().unwrap().to_string());
    }
    assert_eq!(commands.last().map(String::as_str), Some("disconnect"));

    let info = h.ok("debugInfo", json!({})).await;
    assert_eq!(info["body"]["isStarted"], false);
    assert_eq!(info["body"]["breakpoints"], json!([]));
    assert_eq!(info["body"]["stoppedThreads"], json!([]));
}

#[tokio::test]
async fn test_restart_after_disconnect() {
    let mut h = Harness::new().await;
    h.ok("initialize", json!({})).await;
    h.ok("disconnect", json!({})).await;

    h.ok("initialize", json!({})).await;
    assert!(h.debugger.is_started());
    assert_eq!(h.interpreter.executed().len(), 2);
    let reply = h.ok("threads", json!({})).await;
    assert_eq!(reply["command"], "threads");
}

#[tokio::test]
async fn test_stop_and_disconnect_when_never_started() {
    let mut h = Harness::new().await;
    h.debugger.stop().await;
    assert!(!h.debugger.is_started());

    let reply = h.ok("disconnect", json!({})).await;
    assert_eq!(reply["success"], true);
    assert!(!h.debugger.is_started());
}

#[tokio::test]
async fn test_engine_start_failure_is_logged_not_fatal() {
    let failure = ExecutionReply::error(
        "ModuleNotFoundError",
        "No module named 'ptvsd'",
        vec!["Traceback (most recent call last):".to_string()],
    );
    let mut h = Harness::with_config(failure, |config| config).await;

    h.ok("initialize", json!({})).await;
    assert!(h.debugger.is_started());
}

#[tokio::test]
async fn test_engine_start_failure_can_abort() {
    let failure = ExecutionReply::error("ModuleNotFoundError", "No module named 'ptvsd'", vec![]);
    let mut h = Harness::with_config(failure, |config| {
        config.with_abort_on_engine_start_failure(true)
    })
    .await;

    let err = h.request("initialize", json!({})).await.unwrap_err();
    assert!(matches!(err, BridgeError::EngineStart { ref ename, .. } if ename == "ModuleNotFoundError"));
    assert!(!h.debugger.is_started());
}

#[tokio::test]
async fn test_malformed_engine_reply_fails_request_only() {
    let mut h = Harness::new().await;
    h.ok("initialize", json!({})).await;

    let err = h.request("garbage", json!({})).await.unwrap_err();
    assert!(matches!(err, BridgeError::EngineReply(_)));
    assert!(h.debugger.is_started());

    let reply = h.ok("threads", json!({})).await;
    assert_eq!(reply["success"], true);
}

#[tokio::test]
async fn test_initialize_fails_when_engine_unreachable() {
    // Nothing listens on this port once the probe listener is dropped.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let temp = tempfile::tempdir().unwrap();
    let config = BridgeConfig::default()
        .with_engine_port(port)
        .with_temp_dir(temp.path());
    let mut debugger = Debugger::new(config, FakeInterpreter::new(ExecutionReply::ok())).unwrap();

    let message = json!({"seq": 1, "type": "request", "command": "initialize"});
    let err = debugger.process_request(&json!({}), &message).await.unwrap_err();
    assert!(matches!(err, BridgeError::Transport(_)));
    assert!(!debugger.is_started());
}

/// Engine that accepts the connection, reads requests and never answers.
async fn spawn_silent_engine() -> (u16, mpsc::UnboundedReceiver<Value>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (seen_tx, seen) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let Ok((mut stream, _)) = listener.accept().await else {
            return;
        };
        let mut decoder = FrameDecoder::new();
        loop {
            while let Some(frame) = decoder.next_frame().unwrap() {
                let _ = seen_tx.send(serde_json::from_slice::<Value>(&frame).unwrap());
            }
            match stream.read_buf(decoder.buffer_mut()).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
        }
    });

    (port, seen)
}

fn silent_debugger(port: u16, temp: &TempDir) -> Debugger {
    let config = BridgeConfig::default()
        .with_engine_port(port)
        .with_temp_dir(temp.path())
        .with_request_timeout(Duration::from_millis(200));
    Debugger::new(config, FakeInterpreter::new(ExecutionReply::ok())).unwrap()
}

fn request(seq: i64, command: &str) -> Value {
    json!({"seq": seq, "type": "request", "command": command, "arguments": {}})
}

#[tokio::test]
async fn test_request_timeout_bounds_every_request() {
    let (port, mut seen) = spawn_silent_engine().await;
    let temp = tempfile::tempdir().unwrap();
    let mut debugger = silent_debugger(port, &temp);
    let header = json!({});

    let err = debugger
        .process_request(&header, &request(1, "initialize"))
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::Transport(TransportError::Timeout(_))));
    assert!(debugger.is_started());

    for seq in 2..=4 {
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            debugger.process_request(&header, &request(seq, "threads")),
        )
        .await
        .expect("request must give up after its timeout");
        assert!(matches!(
            result,
            Err(BridgeError::Transport(TransportError::Timeout(_)))
        ));
    }

    // Each request reached the engine once, in order.
    let mut seqs = Vec::new();
    while let Ok(request) = seen.try_recv() {
        seqs.push(request["seq"].as_i64().unwrap());
    }
    assert_eq!(seqs, vec![1, 2, 3, 4]);

    debugger.stop().await;
}

#[tokio::test]
async fn test_disconnect_stops_when_engine_does_not_answer() {
    let (port, _seen) = spawn_silent_engine().await;
    let temp = tempfile::tempdir().unwrap();
    let mut debugger = silent_debugger(port, &temp);
    let header = json!({});

    let _ = debugger.process_request(&header, &request(1, "initialize")).await;
    assert!(debugger.is_started());

    let reply = debugger
        .process_request(&header, &request(2, "disconnect"))
        .await
        .unwrap();
    assert_eq!(reply["success"], true);
    assert_eq!(reply["command"], "disconnect");
    assert!(!debugger.is_started());
}

#[tokio::test]
async fn test_initialize_fails_cleanly_when_cell_dir_is_unusable() {
    let mut h = Harness::new().await;

    // A regular file where the cell directory should go.
    let dir = h.debugger.cell_files().prefix().trim_end_matches(std::path::MAIN_SEPARATOR).to_string();
    std::fs::write(&dir, b"").unwrap();

    let err = h.request("initialize", json!({})).await.unwrap_err();
    assert!(matches!(err, BridgeError::Io(_)));
    assert!(!h.debugger.is_started());

    std::fs::remove_file(&dir).unwrap();
    h.ok("initialize", json!({})).await;
    assert!(h.debugger.is_started());
}
