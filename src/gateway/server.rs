//! WebSocket server for the operator console
//!
//! One console is served at a time. A new connection replaces the previous
//! one. When the console goes away the run keeps going unless the gateway
//! was told to stop on disconnect.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;

use super::protocol::{Command, ConsoleStatus, Event, LogPayload};
use super::GatewayError;
use crate::Farmhand;

/// Accepts console connections and turns their commands into bot calls
pub struct Gateway {
    farmhand: Arc<Farmhand>,
    stop_on_disconnect: bool,
    next_id: AtomicU64,
    active: Mutex<Option<(u64, CancellationToken)>>,
}

impl Gateway {
    pub fn new(farmhand: Arc<Farmhand>) -> Self {
        Self {
            farmhand,
            stop_on_disconnect: false,
            next_id: AtomicU64::new(1),
            active: Mutex::new(None),
        }
    }

    /// Request a cooperative stop when the console disconnects
    pub fn stop_on_disconnect(mut self, enabled: bool) -> Self {
        self.stop_on_disconnect = enabled;
        self
    }

    /// Accept connections until `shutdown` fires
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), GatewayError> {
        log::info!("Console gateway listening on ws://{}", listener.local_addr()?);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            log::warn!("Failed to accept console connection: {}", e);
                            continue;
                        }
                    };
                    let gateway = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = gateway.handle_connection(stream, peer).await {
                            log::warn!("Console {} dropped: {}", peer, e);
                        }
                    });
                }
            }
        }

        if let Some((_, token)) = self.active_slot().take() {
            token.cancel();
        }
        Ok(())
    }

    fn active_slot(&self) -> std::sync::MutexGuard<'_, Option<(u64, CancellationToken)>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Become the active console, closing the previous one
    fn claim(&self) -> (u64, CancellationToken) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let token = CancellationToken::new();
        if let Some((_, previous)) = self.active_slot().replace((id, token.clone())) {
            previous.cancel();
        }
        (id, token)
    }

    /// Give up the active slot. False if a newer console already took it.
    fn release(&self, id: u64) -> bool {
        let mut active = self.active_slot();
        if active.as_ref().is_some_and(|(current, _)| *current == id) {
            *active = None;
            true
        } else {
            false
        }
    }

    async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) -> Result<(), GatewayError> {
        let socket = tokio_tungstenite::accept_async(stream).await?;
        log::info!("Console connected from {}", peer);
        let (id, token) = self.claim();
        let (mut sink, mut source) = socket.split();

        self.greet(&mut sink).await?;
        let events = self.farmhand.subscribe();
        self.replay(&mut sink).await?;

        let writer = tokio::spawn(forward(sink, events, token.clone()));

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                message = source.next() => match message {
                    Some(Ok(Message::Text(text))) => self.dispatch(&text).await,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::warn!("Console {} read failed: {}", peer, e);
                        break;
                    }
                },
            }
        }

        token.cancel();
        if let Err(e) = writer.await {
            log::warn!("Console writer ended abnormally: {}", e);
        }

        if !self.release(id) {
            log::info!("Console {} replaced by a newer connection", peer);
        } else if self.stop_on_disconnect && self.farmhand.state().is_running() {
            self.farmhand.reporter().warning("Console disconnected, stopping the bot");
            self.farmhand.stop();
        } else {
            log::info!("Console {} disconnected", peer);
        }
        Ok(())
    }

    /// Connect the device and report the link
    async fn greet<S>(&self, sink: &mut S) -> Result<(), GatewayError>
    where
        S: Sink<Message, Error = WsError> + Unpin,
    {
        let report = self.farmhand.reporter();
        match self.farmhand.connect_device().await {
            Ok(session) => report.success(format!(
                "Emulator {} connected ({})",
                session.device_id,
                session.screen_size()
            )),
            Err(e) => report.warning(format!("Emulator not connected: {}", e)),
        }
        send_event(sink, &self.farmhand.status_event(ConsoleStatus::Connected)).await
    }

    /// Bring a fresh console up to date
    async fn replay<S>(&self, sink: &mut S) -> Result<(), GatewayError>
    where
        S: Sink<Message, Error = WsError> + Unpin,
    {
        for entry in self.farmhand.reporter().recent() {
            send_event(sink, &Event::Log(LogPayload::from(&entry))).await?;
        }
        send_event(sink, &Event::status(self.farmhand.state().status())).await?;
        send_event(sink, &Event::Stats(self.farmhand.stats())).await?;
        send_event(sink, &Event::Config(self.farmhand.config_params())).await
    }

    /// Carry out one console message. Malformed messages are logged and
    /// answered with an `error` event.
    pub async fn dispatch(&self, text: &str) {
        let bot = &self.farmhand;
        let command = match Command::parse(text) {
            Ok(Some(command)) => command,
            Ok(None) => {
                log::debug!("Ignoring non-command message");
                return;
            }
            Err(e) => {
                bot.reporter().warning(format!("Ignored console message: {}", e));
                bot.reporter().emit(Event::Error(e.to_string()));
                return;
            }
        };
        log::debug!("Console command: {:?}", command);

        match command {
            Command::Start => {
                bot.start().await;
            }
            Command::Stop => bot.stop(),
            Command::Pause => bot.pause(),
            Command::Resume => bot.resume(),
            Command::UpdateConfig(params) => {
                bot.update_config(&params);
            }
            Command::Screenshot => match bot.screenshot().await {
                Some(image) => bot.reporter().emit(Event::Screenshot { image }),
                None => {
                    bot.reporter().warning("Screenshot failed");
                    bot.reporter().emit(Event::Error("screenshot failed".into()));
                }
            },
            Command::Tap(target) => {
                bot.tap(target).await;
            }
            Command::Swipe(gesture) => {
                bot.swipe(gesture).await;
            }
            Command::TestCoords => bot.test_coords().await,
            Command::ResetStats => bot.reset_stats(),
            Command::GetConfig => bot.reporter().emit(Event::Config(bot.config_params())),
        }
    }
}

async fn send_event<S>(sink: &mut S, event: &Event) -> Result<(), GatewayError>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    let text = event.encode(Utc::now().timestamp_millis())?;
    sink.send(Message::Text(text)).await?;
    Ok(())
}

/// Push broadcast events to the console until the connection ends
async fn forward<S>(mut sink: S, mut events: broadcast::Receiver<Event>, token: CancellationToken)
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            received = events.recv() => match received {
                Ok(event) => {
                    if let Err(e) = send_event(&mut sink, &event).await {
                        log::debug!("Console write failed: {}", e);
                        token.cancel();
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("Console fell behind, {} events dropped", skipped);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    let _ = sink.close().await;
}
