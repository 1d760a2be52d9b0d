//! End-to-end scan and registration flows through the public API.

use std::time::{Duration, Instant};

use croptag::registration::FormError;
use croptag::session::NoticeLevel;
use croptag::{
    Epc, ExitReason, HttpBackend, InputEvent, Key, Notice, Operator, RegistrationForm,
    ScanController, ScanSession, ScanSettings, ScanView, Storage, SubmitError, Submitter,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

#[derive(Debug, Default)]
struct RecordingView {
    lists: Vec<Vec<String>>,
    notices: Vec<Notice>,
}

impl ScanView for RecordingView {
    fn render(&mut self, session: &ScanSession) {
        self.lists
            .push(session.epcs().iter().map(ToString::to_string).collect());
    }

    fn notify(&mut self, notice: &Notice) {
        self.notices.push(notice.clone());
    }
}

fn repeat(c: char) -> String {
    c.to_string().repeat(24)
}

fn form(total_bags: &str) -> RegistrationForm {
    RegistrationForm {
        crop_id: "CROP-7".to_string(),
        crop_name: "Maize".to_string(),
        packaging_date: "2026-10-01".to_string(),
        expiry_date: "2027-01-01".to_string(),
        bag_capacity: "50".to_string(),
        total_bags: total_bags.to_string(),
    }
}

fn operator() -> Operator {
    Operator::new(Some("station-1".to_string()), Some("user-9".to_string()))
}

async fn send_scan(tx: &mpsc::Sender<InputEvent>, tag: &str) {
    for c in tag.chars() {
        tx.send(InputEvent::Key(Key::Char(c))).await.unwrap();
    }
    tx.send(InputEvent::Key(Key::Enter)).await.unwrap();
}

/// Accept one connection, drain the request, and answer with `status_line`.
async fn serve_once(status_line: &'static str, body: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut data = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&data);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|l| {
                        let (k, v) = l.split_once(':')?;
                        k.eq_ignore_ascii_case("content-length")
                            .then(|| v.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if data.len() >= end + 4 + length {
                    break;
                }
            }
        }
        let response = format!(
            "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        stream.write_all(response.as_bytes()).await.unwrap();
        stream.shutdown().await.unwrap();
    });

    format!("http://{addr}")
}

#[tokio::test(start_paused = true)]
async fn test_three_bag_session_with_echo() {
    let (tx, mut rx) = mpsc::channel(256);
    let producer = tokio::spawn(async move {
        send_scan(&tx, &repeat('A')).await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        send_scan(&tx, &repeat('A')).await;
        tokio::time::sleep(Duration::from_millis(1500)).await;
        send_scan(&tx, &repeat('B')).await;
        tokio::time::sleep(Duration::from_millis(1500)).await;
        send_scan(&tx, &repeat('C')).await;
        tx.send(InputEvent::Submit).await.unwrap();
    });

    let mut controller = ScanController::new(
        ScanSession::open(3, ScanSettings::default()),
        RecordingView::default(),
    );
    let exit = controller.run(&mut rx).await;
    producer.await.unwrap();

    assert_eq!(exit, ExitReason::Submit);
    let session = controller.session();
    let tags: Vec<&str> = session.epcs().iter().map(Epc::as_str).collect();
    assert_eq!(tags, vec![repeat('A'), repeat('B'), repeat('C')]);
    assert!(!session.is_scanning());
    assert_eq!(session.count_label(), "Scanned: 3 / 3");

    let notices = &controller.view().notices;
    assert_eq!(notices.len(), 1, "echo must be silent: {notices:?}");
    assert_eq!(notices[0].level, NoticeLevel::Success);
    assert_eq!(notices[0].text, "All 3 bags scanned. Scanning stopped.");
}

#[tokio::test]
async fn test_submit_with_too_few_bags_is_refused() {
    let mut session = ScanSession::open(3, ScanSettings::default());
    let now = Instant::now();
    session.admit(Epc::parse(&repeat('A')).unwrap(), now);
    session.admit(Epc::parse(&repeat('B')).unwrap(), now);
    let before = session.epcs().to_vec();

    // Nothing listens here; a request would fail with a transport error.
    let submitter = Submitter::new(HttpBackend::new("http://127.0.0.1:9", "/api/rfid/register", None).unwrap());
    let err = submitter
        .submit(&form("3"), &operator(), &session)
        .await
        .unwrap_err();

    assert_eq!(
        err,
        SubmitError::Invalid(FormError::CountMismatch {
            required: 3,
            scanned: 2
        })
    );
    let text = err.notice().text;
    assert!(text.contains('3') && text.contains('2'), "{text}");
    assert_eq!(session.epcs(), before.as_slice());
    assert!(!submitter.is_busy());
}

#[tokio::test]
async fn test_server_error_keeps_session_and_logs_failure() {
    let base = serve_once("500 Internal Server Error", r#"{"message":"Crop not found"}"#).await;
    let submitter = Submitter::new(HttpBackend::new(&base, "/api/rfid/register", None).unwrap());

    let mut controller = ScanController::new(
        ScanSession::open(2, ScanSettings::default()),
        RecordingView::default(),
    );
    let now = Instant::now();
    for tag in [repeat('A'), repeat('B')] {
        for c in tag.chars() {
            controller.handle(InputEvent::Key(Key::Char(c)), now);
        }
        controller.handle(InputEvent::Key(Key::Enter), now + Duration::from_secs(2));
    }
    let list_before = controller.view().lists.last().cloned().unwrap();

    let request = form("2").validate(&operator(), controller.session()).unwrap();
    let result = submitter.send(&request).await;
    let err = result.clone().unwrap_err();
    assert_eq!(
        err,
        SubmitError::Rejected {
            message: "Crop not found".to_string()
        }
    );

    controller.notify(&err.notice());
    controller.render();

    let view = controller.view();
    assert_eq!(view.lists.last().unwrap(), &list_before);
    assert_eq!(view.notices.last().unwrap().level, NoticeLevel::Error);
    assert_eq!(view.notices.last().unwrap().text, "Crop not found");
    assert_eq!(controller.session().len(), 2);

    let storage = Storage::open_in_memory().unwrap();
    storage.log_attempt(&request, &result, 0).unwrap();
    let logged = storage.recent(1).unwrap();
    assert_eq!(logged[0].status, croptag::RegistrationStatus::Rejected);
    assert_eq!(logged[0].epcs, controller.session().epcs());
}

#[tokio::test]
async fn test_successful_registration_is_logged() {
    let base = serve_once("200 OK", r#"{"ok":true,"message":"Registered 1 bag"}"#).await;
    let submitter = Submitter::new(HttpBackend::new(&base, "/api/rfid/register", None).unwrap());

    let mut session = ScanSession::open(1, ScanSettings::default());
    session.admit(Epc::parse(&repeat('D')).unwrap(), Instant::now());

    let request = form("1").validate(&operator(), &session).unwrap();
    let result = submitter.send(&request).await;
    let receipt = result.clone().unwrap();
    assert_eq!(receipt.message, "Registered 1 bag");
    assert_eq!(receipt.bags, 1);

    let dir = tempfile::tempdir().unwrap();
    let storage = Storage::open(dir.path().join("registrations.db")).unwrap();
    storage.log_attempt(&request, &result, 10).unwrap();

    let epc = Epc::parse(&repeat('D')).unwrap();
    let found = storage.find_by_epc(&epc, 10).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].crop_name.as_deref(), Some("Maize"));
    assert!(storage.is_registered(&request.batch_hash()).unwrap());
}
