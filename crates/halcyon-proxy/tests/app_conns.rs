use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use halcyon_app::{Client, ClientError, Request, Response, ResponseCommit};
use halcyon_core::Service;
use halcyon_proxy::{AppConns, ClientCreator, FatalHandler, ProxyError};
use tokio_util::sync::CancellationToken;

type Log = Arc<Mutex<Vec<String>>>;

struct ScriptedClient {
    id: usize,
    fail_start: bool,
    log: Log,
    quit: CancellationToken,
    error: Mutex<Option<ClientError>>,
}

impl ScriptedClient {
    fn fail(&self, err: ClientError) {
        *self.error.lock().unwrap() = Some(err);
        self.quit.cancel();
    }
}

#[async_trait]
impl Client for ScriptedClient {
    async fn start(&self) -> Result<(), ClientError> {
        if self.fail_start {
            return Err(ClientError::Connect("refused".into()));
        }
        self.log.lock().unwrap().push(format!("start:{}", self.id));
        Ok(())
    }

    async fn stop(&self) {
        self.log.lock().unwrap().push(format!("stop:{}", self.id));
        self.quit.cancel();
    }

    async fn request(&self, req: Request) -> Result<Response, ClientError> {
        self.log
            .lock()
            .unwrap()
            .push(format!("request:{}:{}", self.id, req.kind()));
        Ok(Response::Commit(ResponseCommit::default()))
    }

    fn quit(&self) -> CancellationToken {
        self.quit.clone()
    }

    fn error(&self) -> Option<ClientError> {
        self.error.lock().unwrap().clone()
    }
}

struct ScriptedCreator {
    log: Log,
    fail_start_id: Option<usize>,
    created: Mutex<Vec<Arc<ScriptedClient>>>,
}

impl ScriptedCreator {
    fn new(fail_start_id: Option<usize>) -> Self {
        ScriptedCreator {
            log: Arc::new(Mutex::new(Vec::new())),
            fail_start_id,
            created: Mutex::new(Vec::new()),
        }
    }

    fn client(&self, id: usize) -> Arc<ScriptedClient> {
        self.created.lock().unwrap()[id].clone()
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

impl ClientCreator for ScriptedCreator {
    fn new_client(&self) -> Result<Arc<dyn Client>, ProxyError> {
        let mut created = self.created.lock().unwrap();
        let id = created.len();
        let client = Arc::new(ScriptedClient {
            id,
            fail_start: self.fail_start_id == Some(id),
            log: self.log.clone(),
            quit: CancellationToken::new(),
            error: Mutex::new(None),
        });
        created.push(client.clone());
        Ok(client)
    }
}

fn recording_fatal() -> (FatalHandler, Arc<Mutex<Vec<(String, ClientError)>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let handler: FatalHandler = Arc::new(move |conn, err| {
        sink.lock().unwrap().push((conn.to_string(), err.clone()));
    });
    (handler, seen)
}

#[tokio::test]
async fn test_start_order_and_connection_mapping() {
    let creator = ScriptedCreator::new(None);
    let (fatal, _) = recording_fatal();
    let conns = AppConns::new(&creator, fatal).unwrap();
    conns.start().await.unwrap();

    assert_eq!(creator.log(), vec!["start:0", "start:1", "start:2", "start:3"]);

    conns.consensus().commit().await.unwrap();
    conns.query().echo("x".into()).await.unwrap_err();
    let log = creator.log();
    assert!(log.contains(&"request:3:Commit".to_string()));
    assert!(log.contains(&"request:0:Echo".to_string()));

    conns.stop().await.unwrap();
}

#[tokio::test]
async fn test_failed_start_stops_started_clients() {
    let creator = ScriptedCreator::new(Some(2));
    let (fatal, seen) = recording_fatal();
    let conns = AppConns::new(&creator, fatal).unwrap();

    assert!(conns.start().await.is_err());
    assert_eq!(creator.log(), vec!["start:0", "start:1", "stop:0", "stop:1"]);
    assert!(!conns.is_running());
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_client_error_triggers_fatal_handler() {
    let creator = ScriptedCreator::new(None);
    let (fatal, seen) = recording_fatal();
    let conns = AppConns::new(&creator, fatal).unwrap();
    conns.start().await.unwrap();

    creator
        .client(3)
        .fail(ClientError::Transport("connection reset".into()));

    for _ in 0..50 {
        if !seen.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let seen = seen.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![(
            "consensus".to_string(),
            ClientError::Transport("connection reset".into())
        )]
    );
}

#[tokio::test]
async fn test_clean_stop_is_not_fatal() {
    let creator = ScriptedCreator::new(None);
    let (fatal, seen) = recording_fatal();
    let conns = AppConns::new(&creator, fatal).unwrap();
    conns.start().await.unwrap();
    conns.stop().await.unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(seen.lock().unwrap().is_empty());
    assert!(creator.log().ends_with(&[
        "stop:0".to_string(),
        "stop:1".to_string(),
        "stop:2".to_string(),
        "stop:3".to_string()
    ]));
}
