//! One accepted connection, from admission to close.

use std::io;
use std::net::IpAddr;
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use log::{debug, warn};

use crate::access_log::Entry;
use crate::channel::Channel;
use crate::request::{read_request, Request};
use crate::response::Response;
use crate::status::StatusCode;
use crate::Server;

/// Serve a single request on `channel` and close it.
///
/// The request timeout counts from `accepted_at`. The admission slot, if one was granted, is held
/// until the connection is closed.
pub fn run<C: Channel>(server: &Server, mut channel: C, client: IpAddr, accepted_at: Instant) {
    let _slot = match server.admission.try_admit() {
        Some(slot) => slot,
        None => {
            debug!("refusing {}: {} connections active", client, server.config.max_connections);
            let response = Response::new(StatusCode::ServiceUnavailable);
            finish(server, &mut channel, client, None, &response);
            return;
        }
    };

    let deadline = accepted_at + server.config.request_timeout;
    let raw = match read_request(&mut channel, deadline) {
        Ok(Some(raw)) => raw,
        Ok(None) => {
            debug!("{} sent nothing before the timeout", client);
            let response = Response::new(StatusCode::RequestTimeout);
            finish(server, &mut channel, client, None, &response);
            return;
        }
        Err(e) => {
            warn!("failed to read request from {}: {}", client, e);
            channel.close().ok();
            return;
        }
    };

    let request = Request::parse(&raw);
    let response = match request.validate() {
        Ok((method, target)) => method.handle(server, &request, target),
        Err(status) => Response::new(status),
    };
    finish(server, &mut channel, client, Some(&request), &response);
}

/// Send the response, close the connection and record it in the access log.
fn finish<C: Channel>(
    server: &Server,
    channel: &mut C,
    client: IpAddr,
    request: Option<&Request>,
    response: &Response,
) {
    let bytes = response.to_bytes();
    let bytes_sent = match send(channel, &bytes, server.config.close_delay) {
        Ok(()) => bytes.len(),
        Err(e) => {
            warn!("failed to send response to {}: {}", client, e);
            channel.close().ok();
            0
        }
    };
    server.log_access(&Entry {
        client,
        time: SystemTime::now(),
        request,
        status: response.status(),
        bytes_sent,
    });
}

fn send<C: Channel>(channel: &mut C, bytes: &[u8], close_delay: Duration) -> io::Result<()> {
    channel.write_all(bytes)?;
    channel.flush()?;
    // give the peer a moment to read before the connection goes away
    thread::sleep(close_delay);
    channel.close()
}
