/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use anyhow::anyhow;
use bytes::Bytes;
use http::Method;
use url::Url;

use g3_icap_xact::http::{HttpHead, HttpHeaders, HttpReplyHead, HttpRequestHead};
use g3_icap_xact::pipe::{BodyPipeProducer, body_pipe};
use g3_icap_xact::{IcapMethod, IcapXactRequest, MessageFacade};

/// What to send to the ICAP service, as given on the command line.
pub(crate) struct VirginMessage {
    pub(crate) url: Url,
    pub(crate) method: Option<Method>,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) status: u16,
    pub(crate) body: Option<Bytes>,
}

fn parse_header(line: &str) -> anyhow::Result<(String, String)> {
    let Some((name, value)) = line.split_once(':') else {
        return Err(anyhow!("no ':' found in header line {line}"));
    };
    let name = name.trim();
    if name.is_empty() {
        return Err(anyhow!("empty header name in line {line}"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

impl VirginMessage {
    pub(crate) fn new(url: Url) -> Self {
        VirginMessage {
            url,
            method: None,
            headers: Vec::new(),
            status: 200,
            body: None,
        }
    }

    pub(crate) fn add_header(&mut self, line: &str) -> anyhow::Result<()> {
        let header = parse_header(line)?;
        self.headers.push(header);
        Ok(())
    }

    fn request_head(&self, method: Method) -> anyhow::Result<HttpRequestHead> {
        let host = self
            .url
            .host_str()
            .ok_or_else(|| anyhow!("no host found in url {}", self.url))?;
        let mut req = HttpRequestHead::new(method, self.url.as_str());
        match self.url.port() {
            Some(port) => req.headers.append("Host", &format!("{host}:{port}")),
            None => req.headers.append("Host", host),
        }
        Ok(req)
    }

    fn append_headers(&self, headers: &mut HttpHeaders, body_len: usize) {
        for (name, value) in &self.headers {
            headers.append(name, value);
        }
        if !headers.contains("content-length") && !headers.contains("transfer-encoding") {
            headers.append("Content-Length", &body_len.to_string());
        }
    }

    /// Build the adaptation request, and the producer of the virgin body if
    /// there is one.
    pub(crate) fn build(
        &self,
        icap_method: IcapMethod,
        pipe_capacity: usize,
    ) -> anyhow::Result<(IcapXactRequest, Option<BodyPipeProducer>)> {
        let body_len = self.body.as_ref().map(|b| b.len()).unwrap_or_default();
        let (producer, consumer) = if body_len > 0 {
            let (p, c) = body_pipe(pipe_capacity);
            (Some(p), Some(c))
        } else {
            (None, None)
        };

        let request = match icap_method {
            IcapMethod::Reqmod => {
                let method = match &self.method {
                    Some(m) => m.clone(),
                    None if body_len > 0 => Method::POST,
                    None => Method::GET,
                };
                let mut req = self.request_head(method)?;
                if body_len > 0 {
                    self.append_headers(&mut req.headers, body_len);
                } else {
                    for (name, value) in &self.headers {
                        req.headers.append(name, value);
                    }
                }
                IcapXactRequest::new(MessageFacade::new(HttpHead::Request(req), consumer))
            }
            IcapMethod::Respmod => {
                let reason = http::StatusCode::from_u16(self.status)
                    .ok()
                    .and_then(|s| s.canonical_reason())
                    .unwrap_or("Unknown");
                let mut rsp = HttpReplyHead::new(self.status, reason);
                self.append_headers(&mut rsp.headers, body_len);
                let cause = self.request_head(self.method.clone().unwrap_or(Method::GET))?;

                let mut request =
                    IcapXactRequest::new(MessageFacade::new(HttpHead::Reply(rsp), consumer));
                request.set_cause(cause);
                request
            }
            IcapMethod::Options => {
                return Err(anyhow!("OPTIONS is not a modification method"));
            }
        };
        Ok((request, producer))
    }
}

/// Feed the whole body into the pipe.
pub(crate) async fn produce_body(producer: BodyPipeProducer, body: Bytes) {
    if producer.set_body_size(body.len() as u64).is_err() {
        return;
    }
    let mut offset = 0;
    while offset < body.len() {
        if producer.consumer_aborted() {
            return;
        }
        let n = producer.put_more_data(&body[offset..]);
        if n == 0 {
            producer.space_available().await;
        } else {
            offset += n;
        }
    }
    producer.release(true);
}
