/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::BytesMut;
use http::Method;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use url::Url;

use super::*;
use crate::answer::AdaptationAnswer;
use crate::config::IcapXactConfig;
use crate::http::{HttpHead, HttpReplyHead, HttpRequestHead};
use crate::message::MessageFacade;
use crate::pipe::body_pipe;
use crate::service::{
    IcapMethod, IcapService, IcapServiceConfig, IcapServiceOptions, IcapServiceRep,
};

struct TestProvider {
    streams: Mutex<VecDeque<io::Result<DuplexStream>>>,
    pool: IdleConnectionPool<DuplexStream>,
    connects: AtomicUsize,
}

impl TestProvider {
    fn new(streams: Vec<io::Result<DuplexStream>>) -> Self {
        TestProvider {
            streams: Mutex::new(streams.into()),
            pool: IdleConnectionPool::new(4),
            connects: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl IcapConnectionProvider for TestProvider {
    type Stream = DuplexStream;

    async fn connect(
        &self,
        service: &IcapServiceConfig,
        reuse: bool,
    ) -> io::Result<(DuplexStream, bool)> {
        self.connects.fetch_add(1, Ordering::Relaxed);
        if reuse {
            if let Some(stream) = self.pool.take(service.key()) {
                return Ok((stream, true));
            }
        }
        match self.streams.lock().unwrap().pop_front() {
            Some(r) => r.map(|s| (s, false)),
            None => Err(io::Error::from(io::ErrorKind::ConnectionRefused)),
        }
    }

    fn save_idle(&self, service: &IcapServiceConfig, stream: DuplexStream) {
        self.pool.save(service.key(), stream);
    }
}

fn service_config(method: IcapMethod, bypass: bool) -> IcapServiceConfig {
    let url = Url::parse(&format!(
        "icap://127.0.0.1:1344/{}",
        method.as_str().to_lowercase()
    ))
    .unwrap();
    let mut config = IcapServiceConfig::new(method, url).unwrap();
    config.set_bypass(bypass);
    config
}

fn service(method: IcapMethod, bypass: bool) -> Arc<dyn IcapService> {
    IcapServiceRep::for_test(service_config(method, bypass), IcapServiceOptions::default())
}

fn get_request() -> HttpRequestHead {
    let mut req = HttpRequestHead::new(Method::GET, "http://example.net/index.html");
    req.headers.append("Host", "example.net");
    req
}

fn launcher(
    service: Arc<dyn IcapService>,
    config: IcapXactConfig,
) -> (IcapLauncher, oneshot::Receiver<AdaptationAnswer>) {
    let (tx, rx) = oneshot::channel();
    let launcher = IcapLauncher::new(service, Arc::new(config), Box::new(tx));
    (launcher, rx)
}

fn count_blank_lines(buf: &[u8]) -> usize {
    buf.windows(4).filter(|w| *w == b"\r\n\r\n").count()
}

/// Read a request holding `blank_lines` empty lines, then write the reply.
fn serve(mut stream: DuplexStream, blank_lines: usize, reply: String) -> JoinHandle<(DuplexStream, Vec<u8>)> {
    tokio::spawn(async move {
        let mut buf = Vec::new();
        while count_blank_lines(&buf) < blank_lines {
            let mut tmp = [0u8; 4096];
            let n = stream.read(&mut tmp).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&tmp[..n]);
        }
        stream.write_all(reply.as_bytes()).await.unwrap();
        (stream, buf)
    })
}

async fn read_body(msg: &mut MessageFacade) -> BytesMut {
    let mut body = BytesMut::new();
    let Some(pipe) = msg.body_pipe.take() else {
        return body;
    };
    loop {
        body.extend_from_slice(&pipe.take_all());
        if pipe.exhausted() {
            break;
        }
        pipe.data_available().await;
    }
    assert!(!pipe.producer_aborted());
    pipe.detach();
    body
}

#[tokio::test]
async fn reqmod_modified() {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let http = "GET http://example.net/other.html HTTP/1.1\r\nHost: example.net\r\n\r\n";
    let reply = format!(
        "ICAP/1.0 200 OK\r\nISTag: \"t1\"\r\nEncapsulated: req-hdr=0, null-body={}\r\n\r\n{http}",
        http.len()
    );
    let server = serve(server, 2, reply);

    let provider = TestProvider::new(vec![Ok(client)]);
    let service = service(IcapMethod::Reqmod, false);
    let (mut launcher, rx) = launcher(service, IcapXactConfig::default());
    let request = IcapXactRequest::new(MessageFacade::without_body(HttpHead::Request(
        get_request(),
    )));
    run_adaptation(&mut launcher, &provider, request).await;
    assert!(launcher.answered());

    match rx.await.unwrap() {
        AdaptationAnswer::Forward(msg) => {
            let req = msg.head.as_request().unwrap();
            assert_eq!(req.uri, "http://example.net/other.html");
            assert!(msg.body_pipe.is_none());
        }
        a => panic!("unexpected answer {a:?}"),
    }

    let (_server, request) = server.await.unwrap();
    let request = String::from_utf8(request).unwrap();
    assert!(request.starts_with("REQMOD icap://127.0.0.1:1344/reqmod ICAP/1.0\r\n"));
    assert!(request.ends_with("GET http://example.net/index.html HTTP/1.1\r\nHost: example.net\r\n\r\n"));

    assert_eq!(provider.connects.load(Ordering::Relaxed), 1);
    assert_eq!(provider.pool.idle_count("reqmod_127.0.0.1"), 1);
}

#[tokio::test]
async fn respmod_204_echo() {
    let body = b"0123456789";
    let mut rsp = HttpReplyHead::new(200, "OK");
    rsp.headers.append("Content-Length", "10");
    let (producer, consumer) = body_pipe(64 * 1024);
    producer.set_body_size(body.len() as u64).unwrap();
    assert_eq!(producer.put_more_data(body), body.len());
    let mut request =
        IcapXactRequest::new(MessageFacade::new(HttpHead::Reply(rsp), Some(consumer)));
    request.set_cause(get_request());

    let (client, server) = tokio::io::duplex(64 * 1024);
    let reply = "ICAP/1.0 204 No Content\r\nISTag: \"t1\"\r\nEncapsulated: null-body=0\r\n\r\n";
    // icap head, request head, reply head and the last chunk
    let server = serve(server, 4, reply.to_string());

    let provider = TestProvider::new(vec![Ok(client)]);
    let service = service(IcapMethod::Respmod, false);
    let (mut launcher, rx) = launcher(service, IcapXactConfig::default());

    let initiator = async move {
        match rx.await.unwrap() {
            AdaptationAnswer::Forward(mut msg) => {
                assert_eq!(msg.head.as_reply().unwrap().status, 200);
                read_body(&mut msg).await
            }
            a => panic!("unexpected answer {a:?}"),
        }
    };
    let (_, echoed) = tokio::join!(run_adaptation(&mut launcher, &provider, request), initiator);
    assert_eq!(echoed.as_ref(), body);

    let (_server, request) = server.await.unwrap();
    let request = String::from_utf8(request).unwrap();
    assert!(request.ends_with("\r\n\r\na\r\n0123456789\r\n0\r\n\r\n"));
    drop(producer);
}

#[tokio::test]
async fn connect_failed_retried_then_bypassed() {
    let provider = TestProvider::new(vec![
        Err(io::Error::from(io::ErrorKind::ConnectionRefused)),
        Err(io::Error::from(io::ErrorKind::ConnectionRefused)),
    ]);
    let service = service(IcapMethod::Reqmod, true);
    let (mut launcher, rx) = launcher(service, IcapXactConfig::default());
    let request = IcapXactRequest::new(MessageFacade::without_body(HttpHead::Request(
        get_request(),
    )));
    run_adaptation(&mut launcher, &provider, request).await;

    assert_eq!(launcher.launches(), 2);
    assert_eq!(provider.connects.load(Ordering::Relaxed), 2);
    match rx.await.unwrap() {
        AdaptationAnswer::Forward(msg) => {
            let req = msg.head.as_request().unwrap();
            assert_eq!(req.uri, "http://example.net/index.html");
        }
        a => panic!("unexpected answer {a:?}"),
    }
}

#[tokio::test]
async fn closed_without_reply() {
    let (client, mut server) = tokio::io::duplex(64 * 1024);
    let server = tokio::spawn(async move {
        let mut buf = Vec::new();
        while count_blank_lines(&buf) < 2 {
            let mut tmp = [0u8; 4096];
            let n = server.read(&mut tmp).await.unwrap();
            assert_ne!(n, 0);
            buf.extend_from_slice(&tmp[..n]);
        }
        // close without any reply
    });

    let provider = TestProvider::new(vec![Ok(client)]);
    let service = service(IcapMethod::Reqmod, false);
    let (mut launcher, rx) = launcher(service, IcapXactConfig::default());
    let request = IcapXactRequest::new(MessageFacade::without_body(HttpHead::Request(
        get_request(),
    )));
    run_adaptation(&mut launcher, &provider, request).await;
    server.await.unwrap();

    assert_eq!(launcher.launches(), 1);
    match rx.await.unwrap() {
        AdaptationAnswer::Error { is_final } => assert!(!is_final),
        a => panic!("unexpected answer {a:?}"),
    }
    assert_eq!(provider.pool.idle_count("reqmod_127.0.0.1"), 0);
}

#[tokio::test]
async fn wait_for_service_options() {
    let rep = Arc::new(IcapServiceRep::new(Arc::new(service_config(
        IcapMethod::Reqmod,
        false,
    ))));
    let service: Arc<dyn IcapService> = rep.clone();
    assert!(!service.up());

    let (client, server) = tokio::io::duplex(64 * 1024);
    let reply = "ICAP/1.0 204 No Content\r\nISTag: \"t1\"\r\nEncapsulated: null-body=0\r\n\r\n";
    let server = serve(server, 2, reply.to_string());
    let provider = TestProvider::new(vec![Ok(client)]);

    let (mut launcher, rx) = launcher(service, IcapXactConfig::default());
    let request = IcapXactRequest::new(MessageFacade::without_body(HttpHead::Request(
        get_request(),
    )));

    let options = tokio::spawn(async move {
        tokio::task::yield_now().await;
        rep.set_options(IcapServiceOptions::default());
    });
    run_adaptation(&mut launcher, &provider, request).await;
    options.await.unwrap();
    let _ = server.await.unwrap();

    match rx.await.unwrap() {
        AdaptationAnswer::Forward(msg) => {
            let req = msg.head.as_request().unwrap();
            assert_eq!(req.uri, "http://example.net/index.html");
        }
        a => panic!("unexpected answer {a:?}"),
    }
}

#[tokio::test]
async fn initiator_gone_before_answer() {
    let (client, mut server) = tokio::io::duplex(64 * 1024);
    let provider = TestProvider::new(vec![Ok(client)]);
    let service = service(IcapMethod::Reqmod, false);
    let (mut launcher, rx) = launcher(service, IcapXactConfig::default());
    let request = IcapXactRequest::new(MessageFacade::without_body(HttpHead::Request(
        get_request(),
    )));
    drop(rx);

    run_adaptation(&mut launcher, &provider, request).await;
    assert!(launcher.answered());
    assert_eq!(launcher.launches(), 1);

    // the request head may or may not have been sent, but never a reply read
    let mut buf = Vec::new();
    let _ = server.read_to_end(&mut buf).await;
}

#[tokio::test]
async fn closed_before_request_bypassed() {
    let (client, server) = tokio::io::duplex(64 * 1024);
    drop(server);

    let provider = TestProvider::new(vec![Ok(client)]);
    let service = service(IcapMethod::Reqmod, true);
    let (mut launcher, rx) = launcher(service, IcapXactConfig::default());
    let request = IcapXactRequest::new(MessageFacade::without_body(HttpHead::Request(
        get_request(),
    )));
    run_adaptation(&mut launcher, &provider, request).await;

    assert_eq!(launcher.launches(), 1);
    match rx.await.unwrap() {
        AdaptationAnswer::Forward(msg) => {
            let req = msg.head.as_request().unwrap();
            assert_eq!(req.uri, "http://example.net/index.html");
        }
        a => panic!("unexpected answer {a:?}"),
    }
    assert_eq!(provider.pool.idle_count("reqmod_127.0.0.1"), 0);
}

#[test]
fn peer_close_errors() {
    assert!(closed_by_peer(&io::Error::from(io::ErrorKind::BrokenPipe)));
    assert!(closed_by_peer(&io::Error::from(io::ErrorKind::ConnectionReset)));
    assert!(!closed_by_peer(&io::Error::from(io::ErrorKind::TimedOut)));
}
