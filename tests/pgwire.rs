use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{stream, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_postgres::{AsyncMessage, Config, NoTls, Notification, SimpleQueryMessage};
use ulid::Ulid;

use fleetbook::auth::FleetAuthSource;
use fleetbook::engine::Engine;
use fleetbook::notify::NotifyHub;
use fleetbook::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("fleetbook_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Arc::new(Engine::new(dir.join("fleetbook.wal"), Arc::new(NotifyHub::new())).unwrap());
    let auth = FleetAuthSource::new("admin-pw".into(), "operator-pw".into(), "client-pw".into());

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = engine.clone();
            let auth = auth.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine, auth, None).await;
            });
        }
    });

    addr
}

async fn try_connect(
    addr: SocketAddr,
    user: &str,
    password: &str,
) -> Result<(tokio_postgres::Client, mpsc::UnboundedReceiver<Notification>), tokio_postgres::Error>
{
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("fleet")
        .user(user)
        .password(password);

    let (client, mut connection) = config.connect(NoTls).await?;

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let stream = stream::poll_fn(move |cx| connection.poll_message(cx));
        futures::pin_mut!(stream);
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(AsyncMessage::Notification(n)) => {
                    let _ = tx.send(n);
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
    });

    Ok((client, rx))
}

async fn connect(
    addr: SocketAddr,
    user: &str,
) -> (tokio_postgres::Client, mpsc::UnboundedReceiver<Notification>) {
    let password = match user {
        "admin" => "admin-pw",
        "operator" => "operator-pw",
        _ => "client-pw",
    };
    try_connect(addr, user, password).await.unwrap()
}

async fn recv_notification(
    rx: &mut mpsc::UnboundedReceiver<Notification>,
    timeout: Duration,
) -> Option<Notification> {
    tokio::time::timeout(timeout, rx.recv()).await.ok().flatten()
}

/// Rows of a simple query as column → text maps.
async fn select(
    client: &tokio_postgres::Client,
    sql: &str,
) -> Vec<std::collections::HashMap<String, String>> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|msg| match msg {
            SimpleQueryMessage::Row(row) => Some(
                row.columns()
                    .iter()
                    .enumerate()
                    .map(|(i, col)| {
                        (col.name().to_string(), row.get(i).unwrap_or_default().to_string())
                    })
                    .collect(),
            ),
            _ => None,
        })
        .collect()
}

fn sqlstate(err: &tokio_postgres::Error) -> String {
    err.as_db_error()
        .map(|e| e.code().code().to_string())
        .unwrap_or_default()
}

/// Category and one vehicle at 100.00/day, created as admin.
async fn seed_vehicle(client: &tokio_postgres::Client, plate: &str) -> Ulid {
    let category = Ulid::new();
    let vehicle = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO categories (id, name, description) VALUES ('{category}', 'cat {plate}', 'test')"
        ))
        .await
        .unwrap();
    client
        .batch_execute(&format!(
            "INSERT INTO vehicles (id, license_plate, brand, model, year, category_id, transmission, daily_rate, capacity) \
             VALUES ('{vehicle}', '{plate}', 'Toyota', 'Corolla', 2022, '{category}', 'automatic', '100.00', 5)"
        ))
        .await
        .unwrap();
    vehicle
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn book_and_read_back() {
    let addr = start_test_server().await;
    let (admin, _rx) = connect(addr, "admin").await;
    let vehicle = seed_vehicle(&admin, "PG-100").await;

    let (ana, _rx) = connect(addr, "ana").await;
    ana.batch_execute(&format!(
        "INSERT INTO reservations (vehicle_id, start_date, end_date, notes) \
         VALUES ('{vehicle}', '2024-01-10', '2024-01-12', 'airport pickup')"
    ))
    .await
    .unwrap();

    let rows = select(&ana, "SELECT * FROM reservations").await;
    assert_eq!(rows.len(), 1);
    let r = &rows[0];
    assert_eq!(r["client"], "ana");
    assert_eq!(r["start_date"], "2024-01-10");
    assert_eq!(r["end_date"], "2024-01-12");
    assert_eq!(r["days"], "3");
    assert_eq!(r["total_amount"], "300.00");
    assert_eq!(r["status"], "pending");
    assert_eq!(r["notes"], "airport pickup");
    assert_eq!(r["vehicle"], "Toyota Corolla (PG-100)");

    let vehicles = select(&admin, &format!("SELECT * FROM vehicles WHERE id = '{vehicle}'")).await;
    assert_eq!(vehicles[0]["status"], "rented");
}

#[tokio::test]
async fn overlapping_booking_reports_conflict() {
    let addr = start_test_server().await;
    let (admin, _rx) = connect(addr, "admin").await;
    let vehicle = seed_vehicle(&admin, "PG-200").await;

    let insert = |start: &str, end: &str| {
        format!(
            "INSERT INTO reservations (vehicle_id, start_date, end_date) \
             VALUES ('{vehicle}', '{start}', '{end}')"
        )
    };
    admin.batch_execute(&insert("2024-01-10", "2024-01-12")).await.unwrap();

    let err = admin
        .batch_execute(&insert("2024-01-12", "2024-01-14"))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), "23P01");

    let err = admin
        .batch_execute(&insert("2024-01-14", "2024-01-14"))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), "22023");

    admin.batch_execute(&insert("2024-01-13", "2024-01-15")).await.unwrap();
}

#[tokio::test]
async fn cancel_releases_vehicle() {
    let addr = start_test_server().await;
    let (admin, _rx) = connect(addr, "admin").await;
    let vehicle = seed_vehicle(&admin, "PG-300").await;
    let reservation = Ulid::new();
    admin
        .batch_execute(&format!(
            "INSERT INTO reservations (id, vehicle_id, start_date, end_date) \
             VALUES ('{reservation}', '{vehicle}', '2024-01-10', '2024-01-12')"
        ))
        .await
        .unwrap();

    let (bob, _rx) = connect(addr, "bob").await;
    let err = bob
        .batch_execute(&format!(
            "UPDATE reservations SET status = 'cancelled' WHERE id = '{reservation}'"
        ))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), "42501");

    admin
        .batch_execute(&format!(
            "UPDATE reservations SET status = 'cancelled' WHERE id = '{reservation}'"
        ))
        .await
        .unwrap();
    let vehicles = select(&admin, &format!("SELECT * FROM vehicles WHERE id = '{vehicle}'")).await;
    assert_eq!(vehicles[0]["status"], "available");
}

#[tokio::test]
async fn quote_and_dashboard() {
    let addr = start_test_server().await;
    let (admin, _rx) = connect(addr, "admin").await;
    let vehicle = seed_vehicle(&admin, "PG-400").await;

    let quote = select(
        &admin,
        &format!(
            "SELECT * FROM quote WHERE vehicle_id = '{vehicle}' \
             AND start_date = '2024-02-27' AND end_date = '2024-03-02'"
        ),
    )
    .await;
    assert_eq!(quote[0]["days"], "5");
    assert_eq!(quote[0]["total_amount"], "500.00");

    let dashboard = select(&admin, "SELECT * FROM dashboard").await;
    assert_eq!(dashboard[0]["total_vehicles"], "1");
    assert_eq!(dashboard[0]["available_vehicles"], "1");
    assert_eq!(dashboard[0]["pending"], "0");

    let (ana, _rx) = connect(addr, "ana").await;
    let err = ana.simple_query("SELECT * FROM dashboard").await.unwrap_err();
    assert_eq!(sqlstate(&err), "42501");
}

#[tokio::test]
async fn extended_protocol_with_parameters() {
    let addr = start_test_server().await;
    let (admin, _rx) = connect(addr, "admin").await;
    let vehicle = seed_vehicle(&admin, "PG-500").await;
    let id = vehicle.to_string();

    let inserted = admin
        .execute(
            "INSERT INTO reservations (vehicle_id, start_date, end_date, notes) VALUES ($1, $2, $3, $4)",
            &[&id, &"2024-05-01", &"2024-05-03", &"it's prepaid"],
        )
        .await
        .unwrap();
    assert_eq!(inserted, 1);

    let rows = admin
        .query("SELECT * FROM reservations WHERE vehicle_id = $1", &[&id])
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get::<_, String>("notes"), "it's prepaid");
    assert_eq!(rows[0].get::<_, i32>("days"), 3);
}

#[tokio::test]
async fn wrong_password_is_rejected() {
    let addr = start_test_server().await;
    assert!(try_connect(addr, "admin", "client-pw").await.is_err());
    assert!(try_connect(addr, "ana", "nope").await.is_err());
}

#[tokio::test]
async fn listen_receives_vehicle_events() {
    let addr = start_test_server().await;
    let (admin, _rx) = connect(addr, "admin").await;
    let vehicle = seed_vehicle(&admin, "PG-600").await;

    let (watcher, mut rx) = connect(addr, "operator").await;
    watcher
        .batch_execute(&format!("LISTEN vehicle_{vehicle}"))
        .await
        .unwrap();

    let (ana, _rx) = connect(addr, "ana").await;
    ana.batch_execute(&format!(
        "INSERT INTO reservations (vehicle_id, start_date, end_date) \
         VALUES ('{vehicle}', '2024-01-10', '2024-01-12')"
    ))
    .await
    .unwrap();

    // Queued notifications go out with the listener's next statement.
    watcher.simple_query("SELECT * FROM categories").await.unwrap();

    let n = recv_notification(&mut rx, Duration::from_secs(5))
        .await
        .expect("expected a notification");
    assert_eq!(n.channel(), format!("vehicle_{vehicle}"));
    let payload: serde_json::Value = serde_json::from_str(n.payload()).unwrap();
    assert_eq!(payload["kind"], "reservation_created");
    assert_eq!(payload["event"]["ReservationCreated"]["reservation"]["client"], "ana");

    let n = recv_notification(&mut rx, Duration::from_secs(5))
        .await
        .expect("expected the status change");
    let payload: serde_json::Value = serde_json::from_str(n.payload()).unwrap();
    assert_eq!(payload["kind"], "vehicle_status_changed");

    watcher
        .batch_execute(&format!("UNLISTEN vehicle_{vehicle}"))
        .await
        .unwrap();
    admin
        .batch_execute(&format!(
            "UPDATE vehicles SET description = 'clean' WHERE id = '{vehicle}'"
        ))
        .await
        .unwrap();
    watcher.simple_query("SELECT * FROM categories").await.unwrap();
    assert!(recv_notification(&mut rx, Duration::from_millis(200)).await.is_none());
}

#[tokio::test]
async fn listen_rejects_bad_channel() {
    let addr = start_test_server().await;
    let (client, _rx) = connect(addr, "admin").await;
    assert!(client.batch_execute("LISTEN resource_1").await.is_err());
}
