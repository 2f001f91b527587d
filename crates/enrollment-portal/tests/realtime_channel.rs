//! Drives the `/ws` channel over a real TCP socket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use enrollment_portal::config::{EmailConfig, NotificationConfig};
use enrollment_portal::workflows::enrollment::{
    enrollment_router, ApplicationId, ApplicationStatus, EnrollmentService, EnrollmentSubmission,
    MemoryApplicationStore,
};
use enrollment_portal::workflows::notifications::{
    ClientDirectory, EmailComposer, EmailError, StatusEmail, StatusMailer,
};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct DiscardMailer;

impl StatusMailer for DiscardMailer {
    fn send_status_email(&self, _email: &StatusEmail) -> Result<(), EmailError> {
        Ok(())
    }
}

type Service = EnrollmentService<MemoryApplicationStore, DiscardMailer>;

struct Server {
    addr: SocketAddr,
    service: Arc<Service>,
    directory: Arc<ClientDirectory>,
}

async fn start_server() -> Server {
    let directory = Arc::new(ClientDirectory::new(NotificationConfig::default()));
    let service = Arc::new(EnrollmentService::new(
        Arc::new(MemoryApplicationStore::new()),
        Arc::new(DiscardMailer),
        directory.clone(),
        EmailComposer::new(&EmailConfig::default()),
    ));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("ephemeral port");
    let addr = listener.local_addr().expect("bound address");
    let app = enrollment_router(service.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server runs");
    });

    Server {
        addr,
        service,
        directory,
    }
}

fn submission(username: &str) -> EnrollmentSubmission {
    EnrollmentSubmission {
        first_name: "Theo".to_string(),
        middle_name: None,
        last_name: "Nakamura".to_string(),
        email: format!("{username}@families.example.org"),
        phone: "402-555-0163".to_string(),
        birthdate: NaiveDate::from_ymd_opt(2013, 2, 27).expect("valid date"),
        grade_level: "Grade 6".to_string(),
        documents: Vec::new(),
        username: username.to_string(),
        password: "orchard-gate-31".to_string(),
    }
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("websocket handshake");
    client
}

async fn send_json(client: &mut Client, frame: Value) {
    client
        .send(Message::Text(frame.to_string()))
        .await
        .expect("frame sent");
}

async fn next_message(client: &mut Client) -> Option<Message> {
    tokio::time::timeout(Duration::from_secs(2), client.next())
        .await
        .expect("server answered in time")
        .map(|message| message.expect("readable frame"))
}

async fn next_json(client: &mut Client) -> Value {
    match next_message(client).await {
        Some(Message::Text(text)) => serde_json::from_str(&text).expect("json frame"),
        other => panic!("expected a text frame, got {other:?}"),
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within two seconds");
}

async fn registered_client(server: &Server, id: ApplicationId) -> Client {
    let mut client = connect(server.addr).await;
    send_json(&mut client, json!({ "event": "register", "applicationId": id })).await;
    let directory = server.directory.clone();
    wait_until(|| directory.connections_for(id) == 1).await;
    client
}

#[tokio::test]
async fn registered_client_receives_status_frame_and_close_deregisters() {
    let server = start_server().await;
    let application = server.service.submit(submission("theo")).expect("submitted");
    let mut client = registered_client(&server, application.id).await;

    server
        .service
        .change_status(application.id, ApplicationStatus::Approved)
        .expect("approval applies");

    let frame = next_json(&mut client).await;
    assert_eq!(frame["event"], "statusUpdated");
    assert_eq!(frame["applicationId"], application.id.0);
    assert_eq!(frame["previousStatus"], "PendingReview");
    assert_eq!(frame["newStatus"], "Approved");
    assert!(frame["timestamp"].is_string());

    client.close(None).await.expect("close sent");
    let directory = server.directory.clone();
    wait_until(|| directory.connection_count() == 0).await;
    assert_eq!(server.directory.entry_count(), 0);
}

#[tokio::test]
async fn dropped_socket_is_deregistered() {
    let server = start_server().await;
    let application = server.service.submit(submission("ria")).expect("submitted");
    let client = registered_client(&server, application.id).await;

    drop(client);

    let directory = server.directory.clone();
    wait_until(|| directory.connection_count() == 0).await;
}

#[tokio::test]
async fn unreadable_frame_gets_error_reply_and_connection_stays_open() {
    let server = start_server().await;
    let application = server.service.submit(submission("ines")).expect("submitted");
    let mut client = connect(server.addr).await;

    client
        .send(Message::Text("not json".to_string()))
        .await
        .expect("frame sent");
    let reply = next_json(&mut client).await;
    assert_eq!(reply["event"], "error");

    send_json(
        &mut client,
        json!({ "event": "register", "applicationId": application.id }),
    )
    .await;
    let directory = server.directory.clone();
    wait_until(|| directory.connections_for(application.id) == 1).await;
}

#[tokio::test]
async fn directory_shutdown_closes_open_sockets() {
    let server = start_server().await;
    let application = server.service.submit(submission("odin")).expect("submitted");
    let mut client = registered_client(&server, application.id).await;

    server.directory.shutdown();

    match next_message(&mut client).await {
        Some(Message::Close(_)) | None => {}
        other => panic!("expected close frame, got {other:?}"),
    }
    assert_eq!(server.directory.connection_count(), 0);
}
