mod support;

use std::collections::HashSet;

use pretty_assertions::assert_eq;
use tokio::net::TcpStream;
use zero_redis::protocol::FrameReader;
use zero_redis::tokio::Subscriber;

async fn ack_subscription(peer: &mut FrameReader<TcpStream>, kind: &str, names: &[String]) {
    for (index, name) in names.iter().enumerate() {
        let ack = format!(
            "*3\r\n${}\r\n{}\r\n${}\r\n{}\r\n:{}\r\n",
            kind.len(),
            kind,
            name.len(),
            name,
            index + 1
        );
        support::send(peer, ack.as_bytes()).await;
    }
}

async fn push_message(peer: &mut FrameReader<TcpStream>, channel: &str, payload: &str) {
    let frame = format!(
        "*3\r\n$7\r\nmessage\r\n${}\r\n{}\r\n${}\r\n{}\r\n",
        channel.len(),
        channel,
        payload.len(),
        payload
    );
    support::send(peer, frame.as_bytes()).await;
}

async fn push_pmessage(peer: &mut FrameReader<TcpStream>, pattern: &str, channel: &str, payload: &str) {
    let frame = format!(
        "*4\r\n$8\r\npmessage\r\n${}\r\n{}\r\n${}\r\n{}\r\n${}\r\n{}\r\n",
        pattern.len(),
        pattern,
        channel.len(),
        channel,
        payload.len(),
        payload
    );
    support::send(peer, frame.as_bytes()).await;
}

#[tokio::test]
async fn messages_and_pattern_messages_flow() {
    let (listener, url) = support::listen().await;

    let server = tokio::spawn(async move {
        let mut peer = support::accept(&listener).await;

        let sub = support::read_command(&mut peer).await.unwrap();
        assert_eq!(sub, ["SUBSCRIBE", "news"]);
        ack_subscription(&mut peer, "subscribe", &sub[1..]).await;

        let psub = support::read_command(&mut peer).await.unwrap();
        assert_eq!(psub, ["PSUBSCRIBE", "news.*"]);
        ack_subscription(&mut peer, "psubscribe", &psub[1..]).await;

        push_message(&mut peer, "news", "hello").await;
        push_pmessage(&mut peer, "news.*", "news.us", "world").await;

        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
    });

    let mut subscriber = Subscriber::connect(url.as_str()).await.unwrap();
    subscriber.subscribe(&["news"]).await.unwrap();
    subscriber.psubscribe(&["news.*"]).await.unwrap();

    let first = subscriber.next_message().await.unwrap().unwrap();
    assert_eq!(first.pattern, None);
    assert_eq!(first.channel, "news");
    assert_eq!(first.text().unwrap(), "hello");

    let second = subscriber.next_message().await.unwrap().unwrap();
    assert_eq!(second.pattern.as_deref(), Some("news.*"));
    assert_eq!(second.channel, "news.us");
    assert_eq!(second.text().unwrap(), "world");

    server.abort();
}

#[tokio::test]
async fn reconnect_replays_channels_and_patterns() {
    let (listener, url) = support::listen().await;

    let server = tokio::spawn(async move {
        // First session: take the subscriptions, push one message,
        // then drop the socket mid-iteration.
        let mut peer = support::accept(&listener).await;

        let sub = support::read_command(&mut peer).await.unwrap();
        assert_eq!(sub[0], "SUBSCRIBE");
        ack_subscription(&mut peer, "subscribe", &sub[1..]).await;

        let psub = support::read_command(&mut peer).await.unwrap();
        assert_eq!(psub, ["PSUBSCRIBE", "p.*"]);
        ack_subscription(&mut peer, "psubscribe", &psub[1..]).await;

        push_message(&mut peer, "a", "before-drop").await;
        drop(peer);

        // Fresh session: the full state must be replayed before
        // iteration resumes. The reconnect probe may or may not show
        // up depending on how fast the old socket died.
        let mut peer = support::accept(&listener).await;
        let mut replayed_channels: HashSet<String> = HashSet::new();
        let mut replayed_patterns: HashSet<String> = HashSet::new();

        while replayed_channels.len() < 2 || replayed_patterns.len() < 1 {
            let cmd = support::read_command(&mut peer).await.unwrap();
            match cmd[0].as_str() {
                "PING" => support::send(&mut peer, b"+PONG\r\n").await,
                "SUBSCRIBE" => {
                    replayed_channels.extend(cmd[1..].iter().cloned());
                    ack_subscription(&mut peer, "subscribe", &cmd[1..]).await;
                }
                "PSUBSCRIBE" => {
                    replayed_patterns.extend(cmd[1..].iter().cloned());
                    ack_subscription(&mut peer, "psubscribe", &cmd[1..]).await;
                }
                other => panic!("unexpected command {other}"),
            }
        }

        assert_eq!(
            replayed_channels,
            HashSet::from(["a".to_string(), "b".to_string()])
        );
        assert_eq!(replayed_patterns, HashSet::from(["p.*".to_string()]));

        push_message(&mut peer, "b", "after-replay").await;
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
    });

    let mut subscriber = Subscriber::connect(url.as_str()).await.unwrap();
    subscriber.subscribe(&["a", "b"]).await.unwrap();
    subscriber.psubscribe(&["p.*"]).await.unwrap();

    let first = subscriber.next_message().await.unwrap().unwrap();
    assert_eq!(first.channel, "a");
    assert_eq!(first.text().unwrap(), "before-drop");

    // The drop happens here; iteration resumes transparently after
    // the replay.
    let second = subscriber.next_message().await.unwrap().unwrap();
    assert_eq!(second.channel, "b");
    assert_eq!(second.text().unwrap(), "after-replay");

    assert_eq!(subscriber.channels().len(), 2);
    assert_eq!(subscriber.patterns().len(), 1);

    server.abort();
}

#[tokio::test]
async fn unsubscribe_shrinks_local_state() {
    let (listener, url) = support::listen().await;

    let server = tokio::spawn(async move {
        let mut peer = support::accept(&listener).await;

        let sub = support::read_command(&mut peer).await.unwrap();
        assert_eq!(sub, ["SUBSCRIBE", "a", "b"]);
        ack_subscription(&mut peer, "subscribe", &sub[1..]).await;

        let unsub = support::read_command(&mut peer).await.unwrap();
        assert_eq!(unsub, ["UNSUBSCRIBE", "a"]);
        ack_subscription(&mut peer, "unsubscribe", &unsub[1..]).await;

        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
    });

    let mut subscriber = Subscriber::connect(url.as_str()).await.unwrap();
    subscriber.subscribe(&["a", "b"]).await.unwrap();
    assert_eq!(subscriber.channels().len(), 2);

    subscriber.unsubscribe(&["a"]).await.unwrap();
    assert_eq!(subscriber.channels().len(), 1);
    assert!(subscriber.channels().contains("b"));

    server.abort();
}

#[tokio::test]
async fn close_terminates_iteration() {
    let (listener, url) = support::listen().await;

    tokio::spawn(async move {
        let _peer = support::accept(&listener).await;
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
    });

    let mut subscriber = Subscriber::connect(url.as_str()).await.unwrap();
    subscriber.close().await;

    assert_eq!(subscriber.next_message().await.unwrap(), None);
}

#[tokio::test]
async fn interleaved_messages_survive_a_subscribe_call() {
    let (listener, url) = support::listen().await;

    let server = tokio::spawn(async move {
        let mut peer = support::accept(&listener).await;

        let sub = support::read_command(&mut peer).await.unwrap();
        assert_eq!(sub, ["SUBSCRIBE", "a"]);
        ack_subscription(&mut peer, "subscribe", &sub[1..]).await;

        // A message lands between the second SUBSCRIBE and its ack.
        let sub = support::read_command(&mut peer).await.unwrap();
        assert_eq!(sub, ["SUBSCRIBE", "b"]);
        push_message(&mut peer, "a", "early").await;
        ack_subscription(&mut peer, "subscribe", &sub[1..]).await;

        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
    });

    let mut subscriber = Subscriber::connect(url.as_str()).await.unwrap();
    subscriber.subscribe(&["a"]).await.unwrap();
    subscriber.subscribe(&["b"]).await.unwrap();

    // The interleaved message was buffered, not lost.
    let msg = subscriber.next_message().await.unwrap().unwrap();
    assert_eq!(msg.channel, "a");
    assert_eq!(msg.text().unwrap(), "early");

    server.abort();
}
