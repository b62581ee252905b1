use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mpd_engine::mpd::{PlayState, Status, TransportError};
use mpd_engine::{ClientConfig, Mpd, MpdClient, MpdError};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// In-process stand-in for an MPD server.
#[derive(Default)]
struct FakeServer {
  volume: AtomicU8,
  drop_on_ping: AtomicBool,
  received: Mutex<Vec<String>>,
}

impl FakeServer {
  async fn start() -> (Arc<Self>, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = Arc::new(Self {
      volume: AtomicU8::new(50),
      ..Default::default()
    });
    let accepting = server.clone();
    tokio::spawn(async move {
      while let Ok((socket, _)) = listener.accept().await {
        tokio::spawn(accepting.clone().serve(socket));
      }
    });
    (server, port)
  }

  async fn serve(self: Arc<Self>, socket: TcpStream) {
    let (reader, mut writer) = socket.into_split();
    let mut lines = BufReader::new(reader).lines();
    if writer.write_all(b"OK MPD 0.23.5\n").await.is_err() {
      return;
    }

    while let Ok(Some(line)) = lines.next_line().await {
      self.received.lock().push(line.clone());
      let reply = if line == "command_list_begin" {
        while let Ok(Some(next)) = lines.next_line().await {
          self.received.lock().push(next.clone());
          if next == "command_list_end" {
            break;
          }
        }
        "OK\n".to_string()
      } else {
        match self.reply(&line) {
          Some(reply) => reply,
          None => return,
        }
      };
      if writer.write_all(reply.as_bytes()).await.is_err() {
        return;
      }
    }
  }

  /// `None` closes the connection.
  fn reply(&self, line: &str) -> Option<String> {
    let mut words = line.split_whitespace();
    let verb = words.next().unwrap_or_default();
    let reply = match verb {
      "commands" => "command: status\ncommand: currentsong\ncommand: playlistinfo\ncommand: searchadd\ncommand: ping\nOK\n".to_string(),
      "tagtypes" => "tagtype: Artist\ntagtype: Album\ntagtype: AlbumArtist\nOK\n".to_string(),
      "status" => format!(
        "volume: {}\nrepeat: 0\nrandom: 1\nsingle: 0\nconsume: 0\nplaylist: 7\nplaylistlength: 2\nstate: play\nsong: 0\nsongid: 1\nelapsed: 10.000\nduration: 200.000\nOK\n",
        self.volume.load(Ordering::SeqCst)
      ),
      "currentsong" => "file: a.flac\nTitle: A\nPos: 0\nId: 1\nOK\n".to_string(),
      "playlistinfo" => {
        "file: a.flac\nTitle: A\nPos: 0\nId: 1\nfile: b.flac\nTitle: B\nPos: 1\nId: 2\nOK\n".to_string()
      }
      "setvol" => {
        let volume = words.next().and_then(|v| v.parse().ok()).unwrap_or(0);
        self.volume.store(volume, Ordering::SeqCst);
        "OK\n".to_string()
      }
      "update" => "updating_db: 3\nOK\n".to_string(),
      "lsinfo" => "ACK [50@0] {lsinfo} No such directory\n".to_string(),
      "ping" if self.drop_on_ping.swap(false, Ordering::SeqCst) => return None,
      "ping" => "OK\n".to_string(),
      other => format!("ACK [5@0] {{{}}} unknown command \"{}\"\n", other, other),
    };
    Some(reply)
  }
}

fn config_for(port: u16) -> ClientConfig {
  ClientConfig {
    host: "127.0.0.1".into(),
    port,
    idle_enabled: false,
    ..Default::default()
  }
}

#[tokio::test]
async fn test_connect_and_run_verbs() {
  let (server, port) = FakeServer::start().await;
  let mpd = Mpd::connect(config_for(port)).await.unwrap();

  let caps = mpd.capabilities();
  assert_eq!(caps.version.to_string(), "0.23.5");
  assert!(caps.search_add && caps.album_artist);

  let status = mpd.status().await.unwrap();
  assert_eq!(status.state, PlayState::Playing);
  assert_eq!(status.volume, Some(50));
  assert!(status.random);

  let queue = mpd.queue(None).await.unwrap();
  assert_eq!(queue.len(), 2);
  assert_eq!(queue[1].title.as_deref(), Some("B"));

  mpd.set_volume(30).await.unwrap();
  assert_eq!(mpd.status().await.unwrap().volume, Some(30));
  assert_eq!(mpd.update(None).await.unwrap(), Some(3));

  mpd.add_paths(["c.flac", "d.flac"]).await.unwrap();
  let received = server.received.lock().clone();
  assert!(received.contains(&"add c.flac".to_string()));
  assert!(received.contains(&"add d.flac".to_string()));
  mpd.shutdown();
}

#[tokio::test]
async fn test_ack_leaves_connection_usable() {
  let (_server, port) = FakeServer::start().await;
  let mpd = Mpd::connect(config_for(port)).await.unwrap();

  let err = mpd.lsinfo("missing").await.unwrap_err();
  assert_eq!(err.ack().map(|ack| ack.command.as_str()), Some("lsinfo"));
  mpd.ping().await.unwrap();
  assert!(mpd.is_connected().await);
  mpd.shutdown();
}

#[tokio::test]
async fn test_connection_refused() {
  let port = {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
  };
  let err = Mpd::connect(config_for(port)).await.err().unwrap();
  assert!(matches!(
    err,
    MpdError::Transport(TransportError::ConnectionFailed(_))
  ));
}

#[tokio::test]
async fn test_client_monitor_and_reconnect() {
  let (server, port) = FakeServer::start().await;
  let client = MpdClient::connect(config_for(port)).await.unwrap();

  let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
  client.monitor().add_status_listener(Arc::new(move |status: &Status| {
    let _ = tx.send(status.clone());
  }));

  let status = tokio::time::timeout(Duration::from_secs(5), rx.recv())
    .await
    .unwrap()
    .unwrap();
  assert_eq!(status.volume, Some(50));
  assert_eq!(
    client.monitor().current_track().map(|t| t.path),
    Some("a.flac".to_string())
  );

  server.drop_on_ping.store(true, Ordering::SeqCst);
  assert!(client.mpd().ping().await.unwrap_err().is_transport());

  let reconnected = tokio::time::timeout(Duration::from_secs(10), async {
    while !client.mpd().is_connected().await {
      tokio::time::sleep(Duration::from_millis(50)).await;
    }
  })
  .await;
  assert!(reconnected.is_ok());
  client.mpd().ping().await.unwrap();

  client.shutdown();
}
