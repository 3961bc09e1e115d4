use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use innkeep::engine::Engine;
use innkeep::repository::WalRepository;
use innkeep::wire;

// ── Test infrastructure ──────────────────────────────────────

fn test_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("innkeep_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

async fn start_test_server(dir: &Path) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let repo = Arc::new(WalRepository::open(&dir.join("reservations.wal")).unwrap());
    let engine = Arc::new(Engine::new(repo));

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = engine.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine, "innkeep".to_string(), None).await;
            });
        }
    });

    addr
}

async fn connect_with(addr: SocketAddr, password: &str) -> Result<Client, tokio_postgres::Error> {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("innkeep")
        .user("innkeep")
        .password(password);

    let (client, connection) = config.connect(NoTls).await?;
    tokio::spawn(async move {
        let _ = connection.await;
    });
    Ok(client)
}

async fn connect(addr: SocketAddr) -> Client {
    connect_with(addr, "innkeep").await.unwrap()
}

async fn start_and_connect() -> Client {
    let dir = test_dir();
    let addr = start_test_server(&dir).await;
    connect(addr).await
}

fn data_rows(messages: Vec<SimpleQueryMessage>) -> Vec<SimpleQueryRow> {
    messages
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

fn affected(messages: &[SimpleQueryMessage]) -> Option<u64> {
    messages.iter().find_map(|m| match m {
        SimpleQueryMessage::CommandComplete(n) => Some(*n),
        _ => None,
    })
}

/// Run a statement that must fail; return its SQLSTATE and message.
async fn expect_error(client: &Client, sql: &str) -> (String, String) {
    let Err(err) = client.simple_query(sql).await else {
        panic!("expected {sql:?} to fail");
    };
    let db = err.as_db_error().expect("expected a database error");
    (db.code().code().to_string(), db.message().to_string())
}

fn insert(guest: &str, unit: &str, check_in: &str, nights: u32) -> String {
    format!(
        "INSERT INTO bookings (guest_name, unit_id, check_in, nights) \
         VALUES ('{guest}', '{unit}', '{check_in}', {nights})"
    )
}

fn extend(guest: &str, unit: &str, nights: u32) -> String {
    format!(
        "UPDATE bookings SET nights = nights + {nights} \
         WHERE guest_name = '{guest}' AND unit_id = '{unit}'"
    )
}

const DUPLICATE: &str = "the given guest name cannot book the same unit multiple times";
const ELSEWHERE: &str = "the same guest cannot be in multiple units at the same time";
const OCCUPIED: &str = "for the given check-in date, the unit is already occupied";
const NOT_FOUND: &str = "no existing booking found for this guest and unit";

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn insert_reports_one_row() {
    let client = start_and_connect().await;
    let msgs = client
        .simple_query(&insert("GuestA", "1", "2026-10-17", 5))
        .await
        .unwrap();
    assert_eq!(affected(&msgs), Some(1));
}

#[tokio::test]
async fn insert_returning_yields_booking_row() {
    let client = start_and_connect().await;
    let sql = format!("{} RETURNING *", insert("GuestA", "1", "2026-10-17", 5));
    let rows = data_rows(client.simple_query(&sql).await.unwrap());
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert!(Ulid::from_string(row.get("id").unwrap()).is_ok());
    assert_eq!(row.get("guest_name"), Some("GuestA"));
    assert_eq!(row.get("unit_id"), Some("1"));
    assert_eq!(row.get("check_in"), Some("2026-10-17"));
    assert_eq!(row.get("check_out"), Some("2026-10-22"));
    assert_eq!(row.get("nights"), Some("5"));
}

#[tokio::test]
async fn duplicate_stay_rejected() {
    let client = start_and_connect().await;
    client
        .simple_query(&insert("GuestA", "1", "2026-10-17", 5))
        .await
        .unwrap();
    let (code, message) = expect_error(&client, &insert("GuestA", "1", "2026-10-17", 5)).await;
    assert_eq!(code, "23P01");
    assert_eq!(message, DUPLICATE);
}

#[tokio::test]
async fn guest_in_two_units_rejected() {
    let client = start_and_connect().await;
    client
        .simple_query(&insert("GuestA", "1", "2026-10-17", 5))
        .await
        .unwrap();
    let (code, message) = expect_error(&client, &insert("GuestA", "2", "2026-10-17", 5)).await;
    assert_eq!(code, "23P01");
    assert_eq!(message, ELSEWHERE);
}

#[tokio::test]
async fn occupied_unit_rejected_then_later_dates_admitted() {
    let client = start_and_connect().await;
    client
        .simple_query(&insert("GuestA", "1", "2026-10-17", 5))
        .await
        .unwrap();
    let (code, message) = expect_error(&client, &insert("GuestB", "1", "2026-10-17", 5)).await;
    assert_eq!(code, "23P01");
    assert_eq!(message, OCCUPIED);

    client
        .simple_query(&insert("GuestB", "1", "2026-10-23", 5))
        .await
        .unwrap();
}

#[tokio::test]
async fn extend_updates_nights_and_check_out() {
    let client = start_and_connect().await;
    client
        .simple_query(&insert("GuestA", "1", "2026-10-17", 5))
        .await
        .unwrap();

    let msgs = client.simple_query(&extend("GuestA", "1", 2)).await.unwrap();
    assert_eq!(affected(&msgs), Some(1));

    let rows = data_rows(
        client
            .simple_query("SELECT * FROM bookings WHERE guest_name = 'GuestA' AND unit_id = '1'")
            .await
            .unwrap(),
    );
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("nights"), Some("7"));
    assert_eq!(rows[0].get("check_out"), Some("2026-10-24"));
}

#[tokio::test]
async fn extend_returning_yields_updated_row() {
    let client = start_and_connect().await;
    client
        .simple_query(&insert("GuestA", "1", "2026-10-17", 5))
        .await
        .unwrap();
    let sql = format!("{} RETURNING *", extend("GuestA", "1", 1));
    let rows = data_rows(client.simple_query(&sql).await.unwrap());
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("check_out"), Some("2026-10-23"));
}

#[tokio::test]
async fn extend_without_booking_not_found() {
    let client = start_and_connect().await;
    let (code, message) = expect_error(&client, &extend("GuestX", "1", 2)).await;
    assert_eq!(code, "P0002");
    assert_eq!(message, NOT_FOUND);
}

#[tokio::test]
async fn extend_into_next_stay_rejected() {
    let client = start_and_connect().await;
    client
        .simple_query(&insert("GuestA", "1", "2026-10-17", 5))
        .await
        .unwrap();
    client
        .simple_query(&insert("GuestB", "1", "2026-10-22", 3))
        .await
        .unwrap();
    let (code, message) = expect_error(&client, &extend("GuestA", "1", 1)).await;
    assert_eq!(code, "23P01");
    assert_eq!(message, OCCUPIED);
}

#[tokio::test]
async fn invalid_nights_rejected() {
    let client = start_and_connect().await;
    let (code, message) = expect_error(&client, &insert("GuestA", "1", "2026-10-17", 0)).await;
    assert_eq!(code, "22023");
    assert_eq!(message, "invalid request: number of nights must be positive");
}

#[tokio::test]
async fn malformed_sql_is_a_syntax_error() {
    let client = start_and_connect().await;
    let (code, _) = expect_error(&client, "INSERT INTO bookings VALUES ('GuestA')").await;
    assert_eq!(code, "42601");
    let (code, _) = expect_error(&client, "SELECT * FROM guests").await;
    assert_eq!(code, "42601");
    let (code, _) = expect_error(&client, "INSERT INTO bookings VALUES ('A', '1', 'soon', 2)").await;
    assert_eq!(code, "42601");
}

#[tokio::test]
async fn availability_probe() {
    let client = start_and_connect().await;
    client
        .simple_query(&insert("GuestA", "1", "2026-10-17", 5))
        .await
        .unwrap();

    let rows = data_rows(
        client
            .simple_query(
                "SELECT * FROM availability WHERE unit_id = '1' AND guest_name = 'GuestB' \
                 AND check_in = '2026-10-19' AND nights = 2",
            )
            .await
            .unwrap(),
    );
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("check_out"), Some("2026-10-21"));
    assert_eq!(rows[0].get("admitted"), Some("f"));
    assert_eq!(rows[0].get("reason"), Some(OCCUPIED));

    let rows = data_rows(
        client
            .simple_query(
                "SELECT * FROM availability WHERE unit_id = '1' AND guest_name = 'GuestB' \
                 AND check_in = '2026-10-22' AND nights = 2",
            )
            .await
            .unwrap(),
    );
    assert_eq!(rows[0].get("admitted"), Some("t"));
    assert_eq!(rows[0].get("reason"), Some("OK"));

    // Checking availability never writes.
    let all = data_rows(client.simple_query("SELECT * FROM bookings").await.unwrap());
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn list_filters_by_unit() {
    let client = start_and_connect().await;
    for sql in [
        insert("GuestA", "1", "2026-10-17", 2),
        insert("GuestB", "1", "2026-10-19", 2),
        insert("GuestC", "2", "2026-10-17", 2),
    ] {
        client.simple_query(&sql).await.unwrap();
    }
    let rows = data_rows(
        client
            .simple_query("SELECT * FROM bookings WHERE unit_id = '1'")
            .await
            .unwrap(),
    );
    let guests: Vec<_> = rows.iter().map(|r| r.get("guest_name").unwrap()).collect();
    assert_eq!(guests, vec!["GuestA", "GuestB"]);
}

#[tokio::test]
async fn extended_protocol_binds_parameters() {
    let client = start_and_connect().await;
    let n = client
        .execute(
            "INSERT INTO bookings (guest_name, unit_id, check_in, nights) VALUES ($1, $2, $3, $4)",
            &[&"O'Hara", &"1", &"2026-10-17", &"3"],
        )
        .await
        .unwrap();
    assert_eq!(n, 1);

    let n = client
        .execute(
            "UPDATE bookings SET nights = nights + 2 WHERE guest_name = $1 AND unit_id = $2",
            &[&"O'Hara", &"1"],
        )
        .await
        .unwrap();
    assert_eq!(n, 1);

    let err = client
        .execute(
            "INSERT INTO bookings (guest_name, unit_id, check_in, nights) VALUES ($1, $2, $3, $4)",
            &[&"O'Hara", &"1", &"2026-12-01", &"1"],
        )
        .await
        .unwrap_err();
    assert_eq!(err.as_db_error().unwrap().message(), DUPLICATE);
}

#[tokio::test]
async fn bound_values_containing_placeholders_stay_data() {
    let client = start_and_connect().await;
    let n = client
        .execute(
            "INSERT INTO bookings (guest_name, unit_id, check_in, nights) VALUES ($1, $2, $3, $4)",
            &[&"GuestA", &"Suite $1", &"2026-10-17", &"2"],
        )
        .await
        .unwrap();
    assert_eq!(n, 1);

    let rows = data_rows(
        client
            .simple_query("SELECT * FROM bookings WHERE unit_id = 'Suite $1'")
            .await
            .unwrap(),
    );
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("guest_name"), Some("GuestA"));
    assert_eq!(rows[0].get("unit_id"), Some("Suite $1"));
}

#[tokio::test]
async fn health_check_answers_ok() {
    let client = start_and_connect().await;
    let rows = data_rows(client.simple_query("SELECT 1").await.unwrap());
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("health"), Some("OK"));
}

#[tokio::test]
async fn multiple_statements_rejected_before_running() {
    let client = start_and_connect().await;
    let sql = format!(
        "{}; {}",
        insert("GuestA", "1", "2026-10-17", 2),
        insert("GuestB", "2", "2026-10-17", 2)
    );
    let (code, _) = expect_error(&client, &sql).await;
    assert_eq!(code, "42601");

    let all = data_rows(client.simple_query("SELECT * FROM bookings").await.unwrap());
    assert!(all.is_empty());
}

#[tokio::test]
async fn update_filtered_by_check_in_rejected() {
    let client = start_and_connect().await;
    client
        .simple_query(&insert("GuestA", "1", "2026-10-17", 2))
        .await
        .unwrap();
    let (code, _) = expect_error(
        &client,
        "UPDATE bookings SET nights = nights + 2 \
         WHERE guest_name = 'GuestA' AND unit_id = '1' AND check_in = '1999-01-01'",
    )
    .await;
    assert_eq!(code, "42601");

    let rows = data_rows(client.simple_query("SELECT * FROM bookings").await.unwrap());
    assert_eq!(rows[0].get("nights"), Some("2"));
}

#[tokio::test]
async fn wrong_password_rejected() {
    let dir = test_dir();
    let addr = start_test_server(&dir).await;
    assert!(connect_with(addr, "not-the-password").await.is_err());
}

#[tokio::test]
async fn bookings_survive_restart() {
    let dir = test_dir();
    {
        let addr = start_test_server(&dir).await;
        let client = connect(addr).await;
        client
            .simple_query(&insert("GuestA", "1", "2026-10-17", 5))
            .await
            .unwrap();
        client.simple_query(&extend("GuestA", "1", 2)).await.unwrap();
    }

    let addr = start_test_server(&dir).await;
    let client = connect(addr).await;
    let rows = data_rows(client.simple_query("SELECT * FROM bookings").await.unwrap());
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("nights"), Some("7"));

    let (_, message) = expect_error(&client, &insert("GuestB", "1", "2026-10-23", 1)).await;
    assert_eq!(message, OCCUPIED);
}

#[tokio::test]
async fn concurrent_clients_cannot_double_book() {
    let dir = test_dir();
    let addr = start_test_server(&dir).await;

    let mut handles = Vec::new();
    for i in 0..16 {
        handles.push(tokio::spawn(async move {
            let client = connect(addr).await;
            client
                .simple_query(&insert(&format!("Guest{i}"), "1", "2026-10-17", 5))
                .await
                .is_ok()
        }));
    }
    let mut admitted = 0;
    for h in handles {
        if h.await.unwrap() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 1);

    let client = connect(addr).await;
    let rows = data_rows(client.simple_query("SELECT * FROM bookings").await.unwrap());
    assert_eq!(rows.len(), 1);
}
