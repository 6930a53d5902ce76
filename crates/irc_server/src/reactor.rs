//! The I/O Reactor (§4.6): a single-threaded, non-blocking poll loop built on
//! `mio`. No handler in this module, or anywhere downstream of it, may block
//! — every socket is registered non-blocking and every read/write is best
//! effort for the current readiness event.

use crate::dispatcher::{dispatch_line, notify_input_too_long, ServerState};
use crate::errors::ServerError;
use crate::users::{Client, ClientHandle};
use log::{debug, info, warn};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};

const LISTENER_TOKEN: Token = Token(0);
const EVENTS_CAPACITY: usize = 1024;
const READ_CHUNK: usize = 4096;

pub struct Reactor {
    poll: Poll,
    listener: TcpListener,
    state: ServerState,
    sockets: HashMap<ClientHandle, TcpStream>,
    next_handle: ClientHandle,
}

impl Reactor {
    pub fn bind(addr: std::net::SocketAddr, state: ServerState) -> Result<Self, ServerError> {
        let mut listener = TcpListener::bind(addr).map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        let poll = Poll::new().map_err(ServerError::Poll)?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)
            .map_err(ServerError::Poll)?;

        Ok(Reactor {
            poll,
            listener,
            state,
            sockets: HashMap::new(),
            next_handle: 1,
        })
    }

    /// Runs forever. Each iteration: block on `poll` for readiness, drain the
    /// listener if it fired, drain/dispatch every readable client, flush
    /// every writable client, then sweep clients marked for deferred removal
    /// (§4.6) — never while iterating the live socket map.
    pub fn run(&mut self) -> Result<(), ServerError> {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        loop {
            self.poll.poll(&mut events, None).map_err(ServerError::Poll)?;

            for event in events.iter() {
                match event.token() {
                    LISTENER_TOKEN => self.accept_all(),
                    Token(raw) => {
                        let handle = raw as ClientHandle;
                        if event.is_readable() {
                            self.drain_readable(handle);
                        }
                        if event.is_writable() {
                            self.flush_writable(handle);
                        }
                    }
                }
            }

            self.sweep_kicked();
        }
    }

    fn accept_all(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, addr)) => {
                    let handle = self.next_handle;
                    self.next_handle += 1;
                    let token = Token(handle);

                    if let Err(e) = self.poll.registry().register(
                        &mut stream,
                        token,
                        Interest::READABLE | Interest::WRITABLE,
                    ) {
                        warn!("failed to register new connection {addr}: {e}");
                        continue;
                    }

                    let max_line_len = self.state.config.limits.max_line_len;
                    let outbound_cap = self.state.config.limits.outbound_cap_bytes;
                    self.state
                        .clients
                        .insert(Client::new(handle, addr, max_line_len, outbound_cap));
                    self.sockets.insert(handle, stream);
                    info!("accepted connection from {addr} as handle {handle}");
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("accept() failed: {e}");
                    break;
                }
            }
        }
    }

    fn drain_readable(&mut self, handle: ClientHandle) {
        let Some(socket) = self.sockets.get_mut(&handle) else {
            return;
        };
        let mut buf = [0u8; READ_CHUNK];
        loop {
            match socket.read(&mut buf) {
                Ok(0) => {
                    if let Some(client) = self.state.clients.get_mut(handle) {
                        client.should_kick = true;
                    }
                    break;
                }
                Ok(n) => {
                    let (lines, overlong) = {
                        let Some(client) = self.state.clients.get_mut(handle) else {
                            break;
                        };
                        let (lines, err) = client.inbound.feed(&buf[..n]);
                        if err.is_some() {
                            debug!("handle {handle} sent an overlong line");
                        }
                        (lines, err.is_some())
                    };
                    if overlong {
                        notify_input_too_long(&mut self.state, handle);
                    }
                    for line in lines {
                        dispatch_line(&mut self.state, handle, &line);
                    }
                    if self
                        .state
                        .clients
                        .get(handle)
                        .is_none_or(|c| c.should_kick)
                    {
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(_) => {
                    if let Some(client) = self.state.clients.get_mut(handle) {
                        client.should_kick = true;
                    }
                    break;
                }
            }
        }
    }

    fn flush_writable(&mut self, handle: ClientHandle) {
        let Some(socket) = self.sockets.get_mut(&handle) else {
            return;
        };
        let Some(client) = self.state.clients.get_mut(handle) else {
            return;
        };
        if client.outbound.is_empty() {
            return;
        }
        match socket.write(&client.outbound) {
            Ok(0) => {}
            Ok(n) => {
                client.outbound.drain(..n);
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(_) => client.should_kick = true,
        }
    }

    /// Actually removes every client flagged for disconnection this tick.
    /// Deferred so handlers that just ran (QUIT, backpressure overflow,
    /// read errors) never invalidate the map they or a sibling call is still
    /// iterating (§4.6 "no in-place removal").
    fn sweep_kicked(&mut self) {
        for handle in self.state.clients.handles_pending_kick() {
            // give a final chance to flush whatever ERROR/QUIT line was queued
            if let Some(socket) = self.sockets.get_mut(&handle) {
                if let Some(client) = self.state.clients.get_mut(handle) {
                    let _ = socket.write_all(&client.outbound);
                    client.outbound.clear();
                }
            }
            self.state.channels.remove_member_everywhere(handle);
            self.state.clients.remove(handle);
            if let Some(mut socket) = self.sockets.remove(&handle) {
                let _ = self.poll.registry().deregister(&mut socket);
            }
            debug!("handle {handle} removed from registries and deregistered");
        }
    }
}
