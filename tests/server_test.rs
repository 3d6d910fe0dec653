use oxidis::config::Config;
use oxidis::server;
use oxidis::store::{DataStore, DbEngine};
use std::sync::Arc;
use std::time::Duration;

fn config_on(port: u16) -> Config {
    Config {
        port,
        ..Default::default()
    }
}

async fn start_server(config: Config) {
    let config = Arc::new(config);
    let engine: Arc<dyn DbEngine> = DataStore::new_standalone(config.clone())
        .await
        .expect("engine should build");
    tokio::spawn(async move {
        let _ = server::serve(config, engine).await;
    });
    tokio::time::sleep(Duration::from_millis(200)).await;
}

fn connect(port: u16) -> redis::Connection {
    let client = redis::Client::open(format!("redis://127.0.0.1:{port}/")).unwrap();
    for attempt in 0..50 {
        match client.get_connection() {
            Ok(conn) => return conn,
            Err(_) if attempt < 49 => std::thread::sleep(Duration::from_millis(100)),
            Err(err) => panic!("failed to connect: {err}"),
        }
    }
    unreachable!()
}

#[tokio::test]
async fn ping_and_echo_message() {
    let port = 17801;
    start_server(config_on(port)).await;

    tokio::task::spawn_blocking(move || {
        let mut conn = connect(port);
        let pong: String = redis::cmd("PING").query(&mut conn).unwrap();
        assert_eq!(pong, "PONG");
        let msg: String = redis::cmd("PING").arg("hello").query(&mut conn).unwrap();
        assert_eq!(msg, "hello");
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn set_get_and_missing_key() {
    let port = 17802;
    start_server(config_on(port)).await;

    tokio::task::spawn_blocking(move || {
        let mut conn = connect(port);
        let ok: String = redis::cmd("SET").arg("k1").arg("v1").query(&mut conn).unwrap();
        assert_eq!(ok, "OK");
        let value: String = redis::cmd("GET").arg("k1").query(&mut conn).unwrap();
        assert_eq!(value, "v1");
        let missing: Option<String> = redis::cmd("GET").arg("missing").query(&mut conn).unwrap();
        assert_eq!(missing, None);
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn setex_keys_expire() {
    let port = 17803;
    start_server(config_on(port)).await;

    tokio::task::spawn_blocking(move || {
        let mut conn = connect(port);
        let ok: String = redis::cmd("SETEX")
            .arg("k")
            .arg(1)
            .arg("v")
            .query(&mut conn)
            .unwrap();
        assert_eq!(ok, "OK");
        let present: Option<String> = redis::cmd("GET").arg("k").query(&mut conn).unwrap();
        assert_eq!(present.as_deref(), Some("v"));

        std::thread::sleep(Duration::from_millis(1200));
        let gone: Option<String> = redis::cmd("GET").arg("k").query(&mut conn).unwrap();
        assert_eq!(gone, None);
        let exists: i64 = redis::cmd("EXISTS").arg("k").query(&mut conn).unwrap();
        assert_eq!(exists, 0);
        let ttl: i64 = redis::cmd("TTL").arg("k").query(&mut conn).unwrap();
        assert_eq!(ttl, -2);
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn mset_mget_and_msetnx() {
    let port = 17804;
    start_server(config_on(port)).await;

    tokio::task::spawn_blocking(move || {
        let mut conn = connect(port);
        let ok: String = redis::cmd("MSET")
            .arg("a")
            .arg("1")
            .arg("b")
            .arg("2")
            .query(&mut conn)
            .unwrap();
        assert_eq!(ok, "OK");

        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg("a")
            .arg("b")
            .arg("c")
            .query(&mut conn)
            .unwrap();
        assert_eq!(
            values,
            vec![Some("1".to_string()), Some("2".to_string()), None]
        );

        let blocked: i64 = redis::cmd("MSETNX")
            .arg("b")
            .arg("9")
            .arg("c")
            .arg("3")
            .query(&mut conn)
            .unwrap();
        assert_eq!(blocked, 0);
        let untouched: Option<String> = redis::cmd("GET").arg("c").query(&mut conn).unwrap();
        assert_eq!(untouched, None);
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn sorted_set_commands() {
    let port = 17805;
    start_server(config_on(port)).await;

    tokio::task::spawn_blocking(move || {
        let mut conn = connect(port);
        let added: i64 = redis::cmd("ZADD")
            .arg("zs")
            .arg(1)
            .arg("a")
            .arg(2)
            .arg("b")
            .arg(3)
            .arg("c")
            .query(&mut conn)
            .unwrap();
        assert_eq!(added, 3);

        let re_added: i64 = redis::cmd("ZADD")
            .arg("zs")
            .arg(1)
            .arg("a")
            .query(&mut conn)
            .unwrap();
        assert_eq!(re_added, 0);

        let rank: i64 = redis::cmd("ZRANK").arg("zs").arg("a").query(&mut conn).unwrap();
        assert_eq!(rank, 0);
        let rev_rank: i64 = redis::cmd("ZREVRANK").arg("zs").arg("c").query(&mut conn).unwrap();
        assert_eq!(rev_rank, 0);

        let range: Vec<String> = redis::cmd("ZRANGE")
            .arg("zs")
            .arg(0)
            .arg(-1)
            .query(&mut conn)
            .unwrap();
        assert_eq!(range, vec!["a", "b", "c"]);

        let by_score: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg("zs")
            .arg("(1")
            .arg("+inf")
            .query(&mut conn)
            .unwrap();
        assert_eq!(by_score, vec!["b", "c"]);

        let count: i64 = redis::cmd("ZCOUNT")
            .arg("zs")
            .arg(1)
            .arg(2)
            .query(&mut conn)
            .unwrap();
        assert_eq!(count, 2);

        let removed: i64 = redis::cmd("ZREMRANGEBYRANK")
            .arg("zs")
            .arg(0)
            .arg(0)
            .query(&mut conn)
            .unwrap();
        assert_eq!(removed, 1);
        let card: i64 = redis::cmd("ZCARD").arg("zs").query(&mut conn).unwrap();
        assert_eq!(card, 2);
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn select_isolates_databases() {
    let port = 17806;
    start_server(config_on(port)).await;

    tokio::task::spawn_blocking(move || {
        let mut conn = connect(port);
        let _: String = redis::cmd("SET").arg("k").arg("zero").query(&mut conn).unwrap();
        let _: String = redis::cmd("SELECT").arg(1).query(&mut conn).unwrap();
        let other: Option<String> = redis::cmd("GET").arg("k").query(&mut conn).unwrap();
        assert_eq!(other, None);

        let err = redis::cmd("SELECT")
            .arg(99)
            .query::<String>(&mut conn)
            .unwrap_err();
        assert!(err.to_string().contains("DB index is out of range"));
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn auth_gates_commands() {
    let port = 17807;
    let mut config = config_on(port);
    config.requirepass = Some("sekrit".to_string());
    start_server(config).await;

    tokio::task::spawn_blocking(move || {
        let mut conn = connect(port);

        let denied = redis::cmd("GET").arg("k").query::<Option<String>>(&mut conn);
        assert!(denied.unwrap_err().to_string().contains("NOAUTH"));

        let wrong = redis::cmd("AUTH").arg("nope").query::<String>(&mut conn);
        assert!(wrong.unwrap_err().to_string().contains("invalid password"));

        let ok: String = redis::cmd("AUTH").arg("sekrit").query(&mut conn).unwrap();
        assert_eq!(ok, "OK");
        let value: Option<String> = redis::cmd("GET").arg("k").query(&mut conn).unwrap();
        assert_eq!(value, None);
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn unknown_command_and_wrong_type_errors() {
    let port = 17808;
    start_server(config_on(port)).await;

    tokio::task::spawn_blocking(move || {
        let mut conn = connect(port);

        let unknown = redis::cmd("FROBNICATE").query::<String>(&mut conn);
        assert!(unknown
            .unwrap_err()
            .to_string()
            .contains("unknown command 'frobnicate'"));

        let _: String = redis::cmd("SET").arg("s").arg("v").query(&mut conn).unwrap();
        let wrong = redis::cmd("ZADD")
            .arg("s")
            .arg(1)
            .arg("m")
            .query::<i64>(&mut conn);
        assert!(wrong
            .unwrap_err()
            .to_string()
            .contains("wrong kind of value"));

        let arity = redis::cmd("GET").query::<String>(&mut conn);
        assert!(arity
            .unwrap_err()
            .to_string()
            .contains("wrong number of arguments"));
    })
    .await
    .unwrap();
}

/// Two clients race opposing multi-key writes over the same keys; the
/// ordered stripe locking must keep each pair atomic.
#[tokio::test]
async fn concurrent_msets_stay_pairwise_consistent() {
    let port = 17809;
    start_server(config_on(port)).await;

    let writer_a = tokio::task::spawn_blocking(move || {
        let mut conn = connect(port);
        for _ in 0..100 {
            let _: String = redis::cmd("MSET")
                .arg("k1")
                .arg("alpha")
                .arg("k2")
                .arg("alpha")
                .query(&mut conn)
                .unwrap();
        }
    });
    let writer_b = tokio::task::spawn_blocking(move || {
        let mut conn = connect(port);
        for _ in 0..100 {
            let _: String = redis::cmd("MSET")
                .arg("k2")
                .arg("beta")
                .arg("k1")
                .arg("beta")
                .query(&mut conn)
                .unwrap();
        }
    });
    writer_a.await.unwrap();
    writer_b.await.unwrap();

    tokio::task::spawn_blocking(move || {
        let mut conn = connect(port);
        let v1: String = redis::cmd("GET").arg("k1").query(&mut conn).unwrap();
        let v2: String = redis::cmd("GET").arg("k2").query(&mut conn).unwrap();
        assert_eq!(v1, v2, "multi-key write was torn: k1={v1} k2={v2}");
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn inline_commands_are_accepted() {
    let port = 17810;
    start_server(config_on(port)).await;

    tokio::task::spawn_blocking(move || {
        use std::io::{Read, Write};
        let mut stream = std::net::TcpStream::connect(("127.0.0.1", port)).unwrap();
        stream.write_all(b"SET inline works\r\nGET inline\r\n").unwrap();
        std::thread::sleep(Duration::from_millis(100));
        let mut buf = [0u8; 256];
        let n = stream.read(&mut buf).unwrap();
        let response = String::from_utf8_lossy(&buf[..n]).into_owned();
        assert!(response.contains("+OK"));
        assert!(response.contains("works"));
    })
    .await
    .unwrap();
}
