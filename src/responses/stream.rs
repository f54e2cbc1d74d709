use crate::errors::{ResultResp, ServerError};
use astra::{Body, ResponseBuilder};
use serde::Serialize;
use std::io::{self, Read};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};

// Lines queued ahead of a slow client before the producer blocks.
const STREAM_BACKLOG: usize = 8;

/// Producer half of a newline-delimited JSON body.
pub struct NdjsonSender {
    tx: SyncSender<Vec<u8>>,
}

impl NdjsonSender {
    /// Queues one line. Returns `false` once the client has gone away.
    pub fn send<T: Serialize>(&self, value: &T) -> bool {
        let mut line = match serde_json::to_vec(value) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode stream line");
                return false;
            }
        };
        line.push(b'\n');
        self.tx.send(line).is_ok()
    }
}

/// Body half: yields lines as they are sent, EOF once the sender drops.
struct NdjsonReader {
    rx: Receiver<Vec<u8>>,
    chunk: Vec<u8>,
    pos: usize,
}

impl Read for NdjsonReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos >= self.chunk.len() {
            match self.rx.recv() {
                Ok(next) => {
                    self.chunk = next;
                    self.pos = 0;
                }
                Err(_) => return Ok(0),
            }
        }

        let n = buf.len().min(self.chunk.len() - self.pos);
        buf[..n].copy_from_slice(&self.chunk[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// A sender and the response body it feeds.
pub fn ndjson_channel() -> (NdjsonSender, Body) {
    let (tx, rx) = sync_channel(STREAM_BACKLOG);
    let reader = NdjsonReader {
        rx,
        chunk: Vec::new(),
        pos: 0,
    };
    (NdjsonSender { tx }, Body::wrap_reader(reader))
}

pub fn ndjson_response(body: Body) -> ResultResp {
    ResponseBuilder::new()
        .status(200)
        .header("Content-Type", "application/x-ndjson")
        .header("Cache-Control", "no-cache")
        .body(body)
        .map_err(|_| ServerError::InternalError)
}
