use std::net::SocketAddr;
use std::sync::Arc;

use chrono_tz::Tz;
use tokio::net::TcpListener;
use tokio_postgres::{Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use slotgrid::catalog::Catalog;
use slotgrid::engine::{Engine, WalStore};
use slotgrid::wire;

const PASSWORD: &str = "slotgrid";
const TUESDAY: &str = "2026-01-20";

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("slotgrid_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let store = Arc::new(WalStore::open(&dir.join("slotgrid.wal")).unwrap());
    let engine = Arc::new(Engine::new(store, Tz::UTC));
    let catalog = Arc::new(Catalog::builtin());

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = engine.clone();
            let catalog = catalog.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine, catalog, PASSWORD.to_string(), None).await;
            });
        }
    });

    addr
}

async fn connect(addr: SocketAddr) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("slotgrid")
        .user("frontdesk")
        .password(PASSWORD);

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

async fn rows(client: &tokio_postgres::Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|msg| match msg {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

async fn slot(client: &tokio_postgres::Client, date: &str, duration: i64, time: &str) -> SimpleQueryRow {
    let sql = format!("SELECT * FROM availability WHERE date = '{date}' AND duration = {duration}");
    rows(client, &sql)
        .await
        .into_iter()
        .find(|r| r.get("time") == Some(time))
        .unwrap_or_else(|| panic!("no slot at {time}"))
}

fn sqlstate(err: &tokio_postgres::Error) -> String {
    err.as_db_error()
        .map(|db| db.code().code().to_string())
        .unwrap_or_else(|| format!("not a db error: {err}"))
}

async fn book(
    client: &tokio_postgres::Client,
    date: &str,
    time: &str,
    services: &str,
) -> Result<Ulid, tokio_postgres::Error> {
    let id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO appointments (id, date, time, services, customer_name, customer_phone) \
             VALUES ('{id}', '{date}', '{time}', '{services}', 'Ana Silva', '555-0100')"
        ))
        .await?;
    Ok(id)
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn default_grid_over_the_wire() {
    let addr = start_test_server().await;
    let client = connect(addr).await;

    let grid = rows(&client, &format!("SELECT * FROM availability WHERE date = '{TUESDAY}' AND duration = 30")).await;
    assert_eq!(grid.len(), 36);
    assert_eq!(grid[0].get("time"), Some("09:00"));
    assert_eq!(grid[0].get("available"), Some("t"));
    assert_eq!(grid[0].get("reason"), None);
    let last = grid.last().unwrap();
    assert_eq!(last.get("time"), Some("17:45"));
    assert_eq!(last.get("available"), Some("f"));
    assert_eq!(last.get("reason"), Some("insufficient duration"));
}

#[tokio::test]
async fn closed_sunday() {
    let addr = start_test_server().await;
    let client = connect(addr).await;

    let grid = rows(&client, "SELECT * FROM availability WHERE date = '2026-01-18' AND duration = 15").await;
    assert_eq!(grid.len(), 36);
    assert!(grid.iter().all(|r| r.get("available") == Some("f") && r.get("reason") == Some("closed")));
}

#[tokio::test]
async fn booking_then_conflict() {
    let addr = start_test_server().await;
    let client = connect(addr).await;

    let id = book(&client, TUESDAY, "10:00", "haircut").await.unwrap();

    let err = book(&client, TUESDAY, "10:15", "hair-wash").await.unwrap_err();
    assert_eq!(sqlstate(&err), "23P01");

    let booked = slot(&client, TUESDAY, 15, "10:15").await;
    assert_eq!(booked.get("available"), Some("f"));
    assert_eq!(booked.get("reason"), Some("booked"));

    let listed = rows(&client, "SELECT * FROM appointments").await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].get("id"), Some(id.to_string().as_str()));
    assert_eq!(listed[0].get("status"), Some("confirmed"));
    assert_eq!(listed[0].get("services"), Some("haircut"));

    // Adjacent booking is not an overlap.
    book(&client, TUESDAY, "10:30", "hair-wash").await.unwrap();
}

#[tokio::test]
async fn cancel_frees_the_slot() {
    let addr = start_test_server().await;
    let client = connect(addr).await;

    let id = book(&client, TUESDAY, "11:00", "haircut").await.unwrap();
    let n = client
        .execute("DELETE FROM appointments WHERE id = $1", &[&id.to_string()])
        .await
        .unwrap();
    assert_eq!(n, 1);
    assert_eq!(slot(&client, TUESDAY, 30, "11:00").await.get("available"), Some("t"));

    let again = client
        .execute("DELETE FROM appointments WHERE id = $1", &[&id.to_string()])
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&again), "55000");

    let missing = client
        .execute("DELETE FROM appointments WHERE id = $1", &[&Ulid::new().to_string()])
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&missing), "P0002");
}

#[tokio::test]
async fn extended_protocol_availability() {
    let addr = start_test_server().await;
    let client = connect(addr).await;

    let grid = client
        .query(
            "SELECT * FROM availability WHERE date = $1 AND services = $2",
            &[&TUESDAY, &"haircut,beard-trim"],
        )
        .await
        .unwrap();
    assert_eq!(grid.len(), 36);
    let times: Vec<String> = grid.iter().map(|r| r.get("time")).collect();
    assert_eq!(times[0], "09:00");
    // 55 minutes needs four ticks, so the last three cannot start it.
    let reasons: Vec<Option<String>> = grid.iter().map(|r| r.get("reason")).collect();
    assert_eq!(reasons[32], None);
    assert_eq!(reasons[33].as_deref(), Some("insufficient duration"));
}

#[tokio::test]
async fn malformed_inputs() {
    let addr = start_test_server().await;
    let client = connect(addr).await;

    let err = client
        .simple_query(&format!("SELECT * FROM availability WHERE date = '{TUESDAY}' AND duration = 0"))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), "22023");

    let err = book(&client, TUESDAY, "10:00", "perm").await.unwrap_err();
    assert_eq!(sqlstate(&err), "22023");

    let err = book(&client, TUESDAY, "17:45", "haircut").await.unwrap_err();
    assert_eq!(sqlstate(&err), "22023");

    let err = client.simple_query("SELECT * FROM rooms").await.unwrap_err();
    assert_eq!(sqlstate(&err), "42601");
}

#[tokio::test]
async fn working_hours_and_blocks() {
    let addr = start_test_server().await;
    let client = connect(addr).await;

    client
        .batch_execute(
            "INSERT INTO working_hours (day_of_week, start_time, end_time, is_active, lunch_start, lunch_end) \
             VALUES (2, '09:00', '12:00', true, '10:00', '10:30')",
        )
        .await
        .unwrap();
    let hours = rows(&client, "SELECT * FROM working_hours").await;
    assert_eq!(hours.len(), 7);
    let tuesday = hours.iter().find(|r| r.get("day_of_week") == Some("2")).unwrap();
    assert_eq!(tuesday.get("end_time"), Some("12:00"));
    assert_eq!(tuesday.get("lunch_start"), Some("10:00"));

    let grid = rows(&client, &format!("SELECT * FROM availability WHERE date = '{TUESDAY}' AND duration = 15")).await;
    assert_eq!(grid.len(), 12);
    let lunch = grid.iter().find(|r| r.get("time") == Some("10:00")).unwrap();
    assert_eq!(lunch.get("is_lunch"), Some("t"));
    assert_eq!(lunch.get("available"), Some("f"));

    // 2026-01-20 09:00 UTC
    let start = 1_768_899_600_000i64;
    let block_id = Ulid::new();
    client
        .batch_execute(&format!(
            r#"INSERT INTO blocked_times (id, start, "end", reason) VALUES ('{block_id}', {start}, {}, 'training')"#,
            start + 30 * 60_000
        ))
        .await
        .unwrap();
    let blocked = slot(&client, TUESDAY, 15, "09:15").await;
    assert_eq!(blocked.get("reason"), Some("blocked"));

    let err = book(&client, TUESDAY, "09:00", "hair-wash").await.unwrap_err();
    assert_eq!(sqlstate(&err), "23P01");

    client
        .batch_execute(&format!("DELETE FROM blocked_times WHERE id = '{block_id}'"))
        .await
        .unwrap();
    assert!(rows(&client, "SELECT * FROM blocked_times").await.is_empty());
    book(&client, TUESDAY, "09:00", "hair-wash").await.unwrap();
}

#[tokio::test]
async fn services_listing() {
    let addr = start_test_server().await;
    let client = connect(addr).await;

    let services = rows(&client, "SELECT * FROM services").await;
    assert_eq!(services.len(), 6);
    let haircut = services.iter().find(|r| r.get("id") == Some("haircut")).unwrap();
    assert_eq!(haircut.get("duration"), Some("30"));
}

#[tokio::test]
async fn wrong_password_is_rejected() {
    let addr = start_test_server().await;
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("slotgrid")
        .user("frontdesk")
        .password("not-the-password");
    assert!(config.connect(NoTls).await.is_err());
}

#[tokio::test]
async fn customers_and_stats() {
    let addr = start_test_server().await;
    let client = connect(addr).await;

    book(&client, TUESDAY, "10:00", "haircut").await.unwrap();
    book(&client, TUESDAY, "11:00", "hair-wash").await.unwrap();
    client
        .batch_execute(&format!(
            "INSERT INTO appointments (id, date, time, services, customer_name, customer_phone) \
             VALUES ('{}', '{TUESDAY}', '12:00', 'curly', 'Bruno Costa', '555-0200')",
            Ulid::new()
        ))
        .await
        .unwrap();

    let customers = rows(&client, "SELECT * FROM customers").await;
    assert_eq!(customers.len(), 2);
    // Latest visit first.
    assert_eq!(customers[0].get("name"), Some("Bruno Costa"));
    assert_eq!(customers[1].get("phone"), Some("555-0100"));
    assert_eq!(customers[1].get("total_bookings"), Some("2"));

    let found = client
        .query("SELECT * FROM customers WHERE search = $1", &[&"costa"])
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get::<_, String>("phone"), "555-0200");

    let stats = rows(&client, "SELECT * FROM stats").await;
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].get("total_customers"), Some("2"));
    assert!(stats[0].get("today_revenue").is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_clients_one_winner() {
    let addr = start_test_server().await;

    let mut tasks = Vec::new();
    for _ in 0..8 {
        tasks.push(tokio::spawn(async move {
            let client = connect(addr).await;
            book(&client, TUESDAY, "14:00", "haircut").await
        }));
    }

    let mut won = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => won += 1,
            Err(e) => assert_eq!(sqlstate(&e), "23P01"),
        }
    }
    assert_eq!(won, 1);

    let client = connect(addr).await;
    assert_eq!(rows(&client, "SELECT * FROM appointments").await.len(), 1);
}
