//! Integration tests for the WebSocket transport.
//!
//! These spin up a real listener and a `tokio-tungstenite` client so the
//! two-phase upgrade is checked against an independent implementation.

#[cfg(feature = "websocket")]
mod websocket {
    use chargewire_transport::{
        Connection, Incoming, TransportError, WebSocketTransport,
    };
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    use tokio_tungstenite::tungstenite::http::HeaderValue;
    use tokio_tungstenite::tungstenite::{Error as WsError, Message};

    type ClientStream = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    async fn bind() -> (WebSocketTransport, String) {
        let transport = WebSocketTransport::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = transport.local_addr().expect("bound address").to_string();
        (transport, addr)
    }

    async fn connect_client(
        addr: &str,
        path: &str,
        protocol: Option<&str>,
    ) -> Result<ClientStream, WsError> {
        let mut request = format!("ws://{addr}{path}")
            .into_client_request()
            .expect("valid url");
        if let Some(protocol) = protocol {
            request.headers_mut().insert(
                "sec-websocket-protocol",
                HeaderValue::from_str(protocol).unwrap(),
            );
        }
        tokio_tungstenite::connect_async(request)
            .await
            .map(|(ws, _)| ws)
    }

    #[tokio::test]
    async fn test_upgrade_accept_and_exchange_messages() {
        let (transport, addr) = bind().await;

        let server = tokio::spawn(async move {
            let mut incoming = transport.accept().await.expect("should accept");
            let request = incoming.read_request().await.expect("valid upgrade");
            assert_eq!(request.path(), "/ocpp/EVSE-1");
            assert_eq!(request.query(), Some("a=1"));
            assert_eq!(
                request.header_str("sec-websocket-protocol"),
                Some("ocpp1.6")
            );
            incoming.accept(Some("ocpp1.6")).await.expect("upgrade")
        });

        let mut client = connect_client(&addr, "/ocpp/EVSE-1?a=1", Some("ocpp1.6"))
            .await
            .expect("client should connect");
        let server_conn = server.await.expect("task should complete");
        assert!(server_conn.id().into_inner() > 0);

        // server -> client
        server_conn
            .send(br#"[2,"1","Reset",{}]"#)
            .await
            .expect("send should succeed");
        let msg = client.next().await.unwrap().unwrap();
        assert_eq!(msg.into_data().as_ref(), br#"[2,"1","Reset",{}]"#);

        // client -> server
        client
            .send(Message::Text(r#"[3,"1",{}]"#.into()))
            .await
            .unwrap();
        let received = server_conn.recv().await.expect("recv should succeed");
        assert_eq!(
            received,
            Some(Incoming::Message(br#"[3,"1",{}]"#.to_vec()))
        );

        server_conn.close(1000, "done").await.expect("close should succeed");
        match client.next().await {
            Some(Ok(Message::Close(Some(frame)))) => {
                assert_eq!(u16::from(frame.code), 1000);
                assert_eq!(frame.reason.as_str(), "done");
            }
            other => panic!("expected close frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_recv_reports_client_close_frame() {
        let (transport, addr) = bind().await;

        let server = tokio::spawn(async move {
            let mut incoming = transport.accept().await.unwrap();
            incoming.read_request().await.unwrap();
            incoming.accept(None).await.unwrap()
        });

        let mut client = connect_client(&addr, "/EVSE-2", None).await.unwrap();
        let server_conn = server.await.unwrap();

        client.send(Message::Close(None)).await.unwrap();

        let result = server_conn.recv().await.expect("recv should not error");
        assert_eq!(result, Some(Incoming::Close(None)));
    }

    #[tokio::test]
    async fn test_reject_returns_http_status_to_client() {
        let (transport, addr) = bind().await;

        let server = tokio::spawn(async move {
            let mut incoming = transport.accept().await.unwrap();
            incoming.read_request().await.unwrap();
            incoming.reject(401, "bad credentials").await.unwrap();
        });

        let result = connect_client(&addr, "/EVSE-3", Some("ocpp1.6")).await;
        match result {
            Err(WsError::Http(response)) => {
                assert_eq!(response.status().as_u16(), 401);
            }
            other => panic!("expected HTTP error, got {other:?}"),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_plain_http_request_is_bad_request() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (transport, addr) = bind().await;
        let server = tokio::spawn(async move {
            let mut incoming = transport.accept().await.unwrap();
            let err = incoming.read_request().await.unwrap_err();
            assert!(matches!(err, TransportError::BadRequest(_)));
            incoming.reject(400, &err.to_string()).await.unwrap();
        });

        let mut socket = tokio::net::TcpStream::connect(&addr).await.unwrap();
        socket
            .write_all(b"GET /EVSE-4 HTTP/1.1\r\nHost: x\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        socket.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_lf_only_request_head_is_answered() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (transport, addr) = bind().await;
        let server = tokio::spawn(async move {
            let mut incoming = transport.accept().await.unwrap();
            let err = tokio::time::timeout(
                std::time::Duration::from_secs(2),
                incoming.read_request(),
            )
            .await
            .expect("an LF-only head should not stall the reader")
            .unwrap_err();
            assert!(matches!(err, TransportError::BadRequest(_)));
            incoming.reject(400, &err.to_string()).await.unwrap();
        });

        let mut socket = tokio::net::TcpStream::connect(&addr).await.unwrap();
        socket
            .write_all(b"GET /EVSE-6 HTTP/1.1\nHost: x\n\n")
            .await
            .unwrap();
        let mut response = String::new();
        socket.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(response.contains("content-length: "));

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_resolves_when_peer_hangs_up() {
        use tokio::io::AsyncWriteExt;

        let (transport, addr) = bind().await;
        let server = tokio::spawn(async move {
            let mut incoming = transport.accept().await.unwrap();
            incoming.read_request().await.unwrap();
            tokio::time::timeout(
                std::time::Duration::from_secs(2),
                incoming.closed(),
            )
            .await
            .expect("closed() should resolve after the peer hangs up");
        });

        let mut socket = tokio::net::TcpStream::connect(&addr).await.unwrap();
        socket
            .write_all(
                b"GET /EVSE-5 HTTP/1.1\r\n\
                  Host: x\r\n\
                  Connection: Upgrade\r\n\
                  Upgrade: websocket\r\n\
                  Sec-WebSocket-Version: 13\r\n\
                  Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n",
            )
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        drop(socket);

        server.await.unwrap();
    }
}
