use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Days, Local, NaiveDate};
use futures::{stream, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_postgres::{AsyncMessage, Client, Config, NoTls, Notification, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use amenityd::tenant::TenantManager;
use amenityd::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("amenityd_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let tm = Arc::new(TenantManager::new(dir, 1000));

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let tm = tm.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, tm, "amenityd".to_string(), None).await;
            });
        }
    });

    addr
}

async fn connect(addr: SocketAddr, db: &str) -> (Client, mpsc::UnboundedReceiver<Notification>) {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname(db)
        .user("amenityd")
        .password("amenityd");

    let (client, mut connection) = config.connect(NoTls).await.unwrap();

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

    (client, rx)
}

async fn recv_notification(
    rx: &mut mpsc::UnboundedReceiver<Notification>,
    timeout: Duration,
) -> Option<Notification> {
    tokio::time::timeout(timeout, rx.recv()).await.ok().flatten()
}

async fn rows(client: &Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(r) => Some(r),
            _ => None,
        })
        .collect()
}

fn sqlstate(err: &tokio_postgres::Error) -> &str {
    err.code().map(|c| c.code()).unwrap_or("")
}

fn tomorrow() -> NaiveDate {
    Local::now().date_naive().checked_add_days(Days::new(1)).unwrap()
}

struct Fixture {
    amenity: Ulid,
    admin: Ulid,
    resident: Ulid,
}

/// A 60-minute-block pool open 08:00-20:00 every day, one admin and one resident.
async fn setup(client: &Client) -> Fixture {
    let location = Ulid::new();
    let amenity = Ulid::new();
    let admin = Ulid::new();
    let resident = Ulid::new();

    let statements = [
        format!("INSERT INTO members (user_id, location_id, role) VALUES ('{admin}', '{location}', 'admin')"),
        format!("INSERT INTO members (user_id, location_id, role) VALUES ('{resident}', '{location}', 'resident')"),
        format!(
            "INSERT INTO amenities (id, location_id, name, category, capacity) \
             VALUES ('{amenity}', '{location}', 'Pool', 'pool', 10)"
        ),
    ];
    for sql in &statements {
        client.batch_execute(sql).await.unwrap();
    }
    for day in 0..7 {
        client
            .batch_execute(&format!(
                "INSERT INTO schedules (amenity_id, day_of_week, start_time, end_time, block_duration_minutes) \
                 VALUES ('{amenity}', {day}, '08:00', '20:00', 60)"
            ))
            .await
            .unwrap();
    }

    Fixture { amenity, admin, resident }
}

fn book_sql(f: &Fixture, user: Ulid, date: NaiveDate, start: &str, end: &str) -> String {
    format!(
        "INSERT INTO reservations (amenity_id, user_id, reservation_date, start_time, end_time, attendees) \
         VALUES ('{}', '{user}', '{date}', '{start}', '{end}', 2) RETURNING *",
        f.amenity
    )
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn booking_flow_over_the_wire() {
    let addr = start_test_server().await;
    let (client, _rx) = connect(addr, "booking_flow").await;
    let f = setup(&client).await;
    let date = tomorrow();

    let avail = rows(
        &client,
        &format!(
            "SELECT * FROM availability WHERE amenity_id = '{}' AND reservation_date = '{date}'",
            f.amenity
        ),
    )
    .await;
    assert_eq!(avail.len(), 1);
    assert_eq!(avail[0].get("available"), Some("t"));
    let slots: serde_json::Value = serde_json::from_str(avail[0].get("slots").unwrap()).unwrap();
    assert_eq!(slots.as_array().unwrap().len(), 12);

    let booked = rows(&client, &book_sql(&f, f.resident, date, "10:00", "12:00")).await;
    assert_eq!(booked.len(), 1);
    assert_eq!(booked[0].get("status"), Some("approved"));
    assert_eq!(booked[0].get("start_time"), Some("10:00"));
    assert_eq!(booked[0].get("end_time"), Some("12:00"));
    let rid = booked[0].get("id").unwrap().to_string();

    let slots = rows(
        &client,
        &format!(
            "SELECT * FROM slots WHERE amenity_id = '{}' AND reservation_date = '{date}'",
            f.amenity
        ),
    )
    .await;
    let taken: Vec<_> = slots
        .iter()
        .filter(|r| r.get("available") == Some("f"))
        .map(|r| r.get("start_time").unwrap().to_string())
        .collect();
    assert_eq!(taken, vec!["10:00", "11:00"]);

    let mine = rows(
        &client,
        &format!("SELECT * FROM reservations WHERE user_id = '{}'", f.resident),
    )
    .await;
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].get("id"), Some(rid.as_str()));

    client
        .batch_execute(&format!(
            "UPDATE reservations SET status = 'cancelled', cancelled_by = '{}' WHERE id = '{rid}'",
            f.resident
        ))
        .await
        .unwrap();
    let after = rows(&client, &format!("SELECT * FROM reservations WHERE id = '{rid}'")).await;
    assert_eq!(after[0].get("status"), Some("cancelled"));
    assert_eq!(after[0].get("cancelled_by"), Some(f.resident.to_string().as_str()));
}

#[tokio::test]
async fn conflicting_booking_is_an_exclusion_violation() {
    let addr = start_test_server().await;
    let (client, _rx) = connect(addr, "conflict").await;
    let f = setup(&client).await;
    let date = tomorrow();

    rows(&client, &book_sql(&f, f.resident, date, "10:00", "12:00")).await;

    let err = client
        .simple_query(&book_sql(&f, f.admin, date, "11:00", "13:00"))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), "23P01");

    // Back-to-back is fine.
    let ok = rows(&client, &book_sql(&f, f.admin, date, "12:00", "13:00")).await;
    assert_eq!(ok.len(), 1);
}

#[tokio::test]
async fn rejections_carry_their_sqlstate() {
    let addr = start_test_server().await;
    let (client, _rx) = connect(addr, "sqlstates").await;
    let f = setup(&client).await;
    let date = tomorrow();

    let outsider = Ulid::new();
    let err = client
        .simple_query(&book_sql(&f, outsider, date, "10:00", "11:00"))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), "42501");

    let err = client
        .simple_query(&book_sql(&f, f.resident, date, "10:30", "11:30"))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), "22003");

    let far = Local::now().date_naive().checked_add_days(Days::new(90)).unwrap();
    let err = client
        .simple_query(&book_sql(&f, f.resident, far, "10:00", "11:00"))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), "22008");

    let err = client
        .simple_query(&format!(
            "UPDATE reservations SET status = 'approved', approved_by = '{}' WHERE id = '{}'",
            f.admin,
            Ulid::new()
        ))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), "P0002");

    let err = client.simple_query("SELECT * FROM nowhere").await.unwrap_err();
    assert_eq!(sqlstate(&err), "42601");
}

#[tokio::test]
async fn extended_protocol_binds_parameters() {
    let addr = start_test_server().await;
    let (client, _rx) = connect(addr, "extended").await;
    let f = setup(&client).await;
    let date = tomorrow().to_string();

    let amenity = f.amenity.to_string();
    let resident = f.resident.to_string();
    let booked = client
        .query(
            "INSERT INTO reservations (amenity_id, user_id, reservation_date, start_time, end_time) \
             VALUES ($1, $2, $3, $4, $5) RETURNING *",
            &[&amenity, &resident, &date, &"14:00", &"15:00"],
        )
        .await
        .unwrap();
    assert_eq!(booked.len(), 1);
    let status: &str = booked[0].get("status");
    assert_eq!(status, "approved");

    let listed = client
        .query(
            "SELECT * FROM reservations WHERE amenity_id = $1 AND reservation_date = $2",
            &[&amenity, &date],
        )
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
}

#[tokio::test]
async fn tenants_are_isolated() {
    let addr = start_test_server().await;
    let (a, _ra) = connect(addr, "tenant_a").await;
    let (b, _rb) = connect(addr, "tenant_b").await;
    let f = setup(&a).await;

    assert_eq!(rows(&a, "SELECT * FROM amenities").await.len(), 1);
    assert!(rows(&b, "SELECT * FROM amenities").await.is_empty());

    let err = b
        .simple_query(&format!("SELECT * FROM schedules WHERE amenity_id = '{}'", f.amenity))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), "P0002");
}

#[tokio::test]
async fn listener_receives_booking_notifications() {
    let addr = start_test_server().await;
    let (listener, mut rx) = connect(addr, "notify").await;
    let f = setup(&listener).await;

    listener
        .batch_execute(&format!("LISTEN amenity_{}", f.amenity))
        .await
        .unwrap();

    let (booker, _) = connect(addr, "notify").await;
    let booked = rows(&booker, &book_sql(&f, f.resident, tomorrow(), "09:00", "10:00")).await;
    let rid = booked[0].get("id").unwrap().to_string();

    // Delivered at the listener's next command boundary.
    listener.batch_execute("SELECT * FROM amenities").await.unwrap();

    let n = recv_notification(&mut rx, Duration::from_secs(5))
        .await
        .expect("expected notification");
    assert_eq!(n.channel(), format!("amenity_{}", f.amenity));
    let payload: serde_json::Value = serde_json::from_str(n.payload()).unwrap();
    assert_eq!(payload["event"], "reservation_created");
    assert_eq!(payload["reservation_id"], rid.as_str());
    assert_eq!(payload["status"], "approved");
}

#[tokio::test]
async fn listen_twice_delivers_once() {
    let addr = start_test_server().await;
    let (listener, mut rx) = connect(addr, "listen_twice").await;
    let f = setup(&listener).await;

    let listen = format!("LISTEN amenity_{}", f.amenity);
    listener.batch_execute(&listen).await.unwrap();
    listener.batch_execute(&listen).await.unwrap();

    rows(&listener, &book_sql(&f, f.resident, tomorrow(), "09:00", "10:00")).await;

    assert!(recv_notification(&mut rx, Duration::from_secs(5)).await.is_some());
    assert!(recv_notification(&mut rx, Duration::from_millis(300)).await.is_none());
}

#[tokio::test]
async fn unlisten_stops_notifications() {
    let addr = start_test_server().await;
    let (listener, mut rx) = connect(addr, "unlisten").await;
    let f = setup(&listener).await;

    listener
        .batch_execute(&format!("LISTEN amenity_{}", f.amenity))
        .await
        .unwrap();
    listener.batch_execute("UNLISTEN *").await.unwrap();

    rows(&listener, &book_sql(&f, f.resident, tomorrow(), "09:00", "10:00")).await;
    listener.batch_execute("SELECT * FROM amenities").await.unwrap();

    assert!(recv_notification(&mut rx, Duration::from_millis(300)).await.is_none());
}

#[tokio::test]
async fn listen_on_unknown_amenity_fails() {
    let addr = start_test_server().await;
    let (client, _rx) = connect(addr, "listen_unknown").await;

    let err = client
        .batch_execute(&format!("LISTEN amenity_{}", Ulid::new()))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), "P0002");

    let err = client.batch_execute("LISTEN lobby").await.unwrap_err();
    assert_eq!(sqlstate(&err), "42602");
}
