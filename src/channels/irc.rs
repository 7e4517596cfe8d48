use crate::channels::framing::{LINE_TERMINATOR, LineFramer};
use crate::channels::traits::{Channel, SendMessage};
use crate::config::IrcConfig;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;

// Use tokio_rustls's re-export of rustls types
use tokio_rustls::rustls;

/// Read timeout for IRC. If no data arrives within this duration, the
/// connection is considered dead. IRC servers typically PING every 60-120s.
const READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Upper bound for TCP connect plus TLS handshake.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Bytes requested from the transport per read.
const READ_CHUNK: usize = 4096;

/// A parsed IRC message.
#[derive(Debug, Clone, PartialEq, Eq)]
struct IrcMessage {
    prefix: Option<String>,
    command: String,
    params: Vec<String>,
}

impl IrcMessage {
    /// Parse a raw IRC line into an `IrcMessage`.
    ///
    /// IRC format: `[:<prefix>] <command> [<params>] [:<trailing>]`
    fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return None;
        }

        let (prefix, rest) = if let Some(stripped) = line.strip_prefix(':') {
            let space = stripped.find(' ')?;
            (Some(stripped[..space].to_string()), &stripped[space + 1..])
        } else {
            (None, line)
        };

        // A message with no params has its trailing right after the command.
        let (params_part, trailing) = if let Some(colon_pos) = rest.find(" :") {
            (&rest[..colon_pos], Some(&rest[colon_pos + 2..]))
        } else {
            (rest, None)
        };

        let mut parts = params_part.split_whitespace();
        let command = parts.next()?.to_uppercase();
        let mut params: Vec<String> = parts.map(str::to_string).collect();
        if let Some(t) = trailing {
            params.push(t.to_string());
        }

        Some(IrcMessage {
            prefix,
            command,
            params,
        })
    }

    /// Last parameter, which carries the human-readable text for most replies.
    fn trailing(&self) -> &str {
        self.params.last().map_or("", String::as_str)
    }
}

// ── Inbound events ───────────────────────────────────────────────

/// A `PRIVMSG` line that could not be split into its parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("PRIVMSG without an origin prefix")]
    MissingOrigin,
    #[error("PRIVMSG without a destination")]
    MissingDestination,
    #[error("PRIVMSG without message text")]
    MissingText,
}

/// A chat line addressed to a channel or to the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub sender: String,
    pub destination: String,
    pub text: String,
}

impl ChatMessage {
    /// Extract sender, destination and text from a raw `PRIVMSG` line.
    ///
    /// The sender is the origin before `!`. Destination and text come from
    /// the part after the first `PRIVMSG `, split on its first `:`. Both are
    /// trimmed, so the text may itself contain `PRIVMSG` or colons.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let origin = line
            .strip_prefix(':')
            .and_then(|rest| rest.split(' ').next())
            .ok_or(ProtocolError::MissingOrigin)?;
        let sender = origin.split('!').next().unwrap_or_default();
        if sender.is_empty() {
            return Err(ProtocolError::MissingOrigin);
        }

        let (_, addressed) = line
            .split_once("PRIVMSG ")
            .ok_or(ProtocolError::MissingDestination)?;
        let (destination, text) = addressed
            .split_once(':')
            .ok_or(ProtocolError::MissingText)?;
        let destination = destination.trim();
        if destination.is_empty() {
            return Err(ProtocolError::MissingDestination);
        }

        Ok(Self {
            sender: sender.to_string(),
            destination: destination.to_string(),
            text: text.trim().to_string(),
        })
    }
}

/// One parsed inbound line, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// Keep-alive probe carrying the token to echo back.
    Ping(String),
    ChatMessage(ChatMessage),
    Unrecognized(String),
}

impl InboundEvent {
    pub fn parse(line: &str) -> Self {
        let Some(msg) = IrcMessage::parse(line) else {
            return Self::Unrecognized(line.to_string());
        };

        match msg.command.as_str() {
            "PING" => Self::Ping(msg.params.first().cloned().unwrap_or_default()),
            "PRIVMSG" => match ChatMessage::parse(line) {
                Ok(chat) => Self::ChatMessage(chat),
                Err(e) => {
                    tracing::warn!("Skipping malformed IRC line ({e}): {line}");
                    Self::Unrecognized(line.to_string())
                }
            },
            _ => Self::Unrecognized(line.to_string()),
        }
    }
}

// ── Session ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Handshaking,
    Ready,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("timed out connecting to {0}")]
    ConnectTimeout(String),
    #[error("invalid TLS server name: {0}")]
    InvalidServerName(String),
    #[error("IRC transport error: {0}")]
    Io(#[from] std::io::Error),
    #[error("IRC read timed out (no data for {0:?})")]
    ReadTimeout(Duration),
    #[error("IRC connection closed by server")]
    Closed,
    #[error("IRC server error: {0}")]
    ServerError(String),
    #[error("IRC registration rejected: {0}")]
    RegistrationRejected(String),
    #[error("IRC session is not connected")]
    NotConnected,
}

/// Identity and pacing settings for one session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub nickname: String,
    pub username: String,
    pub realname: String,
    pub channels: Vec<String>,
    pub server_password: Option<String>,
    pub nickserv_password: Option<String>,
    pub join_delay: Duration,
    pub send_delay: Duration,
}

impl SessionOptions {
    pub fn from_config(config: &IrcConfig) -> Self {
        Self {
            nickname: config.nickname.clone(),
            username: config.effective_username().to_string(),
            realname: config.realname.clone(),
            channels: config.channels.clone(),
            server_password: config.server_password.clone(),
            nickserv_password: config.nickserv_password.clone(),
            join_delay: Duration::from_millis(config.join_delay_ms),
            send_delay: Duration::from_millis(config.send_delay_ms),
        }
    }
}

pub type TlsStream = tokio_rustls::client::TlsStream<TcpStream>;

/// A registered IRC connection over any byte stream.
///
/// Owns the transport and the inbound framer. Reads, keep-alive replies and
/// sends all happen on the caller's task, one at a time.
pub struct IrcSession<S> {
    stream: S,
    framer: LineFramer,
    nickname: String,
    /// Lowercased names of the channels a JOIN was sent for.
    joined: BTreeSet<String>,
    state: SessionState,
    send_delay: Duration,
    last_chat_send: Option<Instant>,
    /// First error behind a failed [`Channel::send`], kept for the caller
    /// that only saw the session drop.
    send_failure: Option<SessionError>,
}

impl<S> IrcSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Register on an open transport and join the configured channels.
    ///
    /// Returns once `001` has been seen and every JOIN has been sent.
    pub async fn register(stream: S, options: &SessionOptions) -> Result<Self, SessionError> {
        let mut session = Self {
            stream,
            framer: LineFramer::new(),
            nickname: options.nickname.clone(),
            joined: BTreeSet::new(),
            state: SessionState::Handshaking,
            send_delay: options.send_delay,
            last_chat_send: None,
            send_failure: None,
        };

        match session.handshake(options).await {
            Ok(()) => {
                session.state = SessionState::Ready;
                Ok(session)
            }
            Err(e) => {
                session.state = SessionState::Disconnected;
                Err(e)
            }
        }
    }

    async fn handshake(&mut self, options: &SessionOptions) -> Result<(), SessionError> {
        if let Some(ref pass) = options.server_password {
            self.send_raw(&format!("PASS {pass}")).await?;
        }
        self.send_raw(&format!("NICK {}", self.nickname)).await?;
        self.send_raw(&format!(
            "USER {} 0 * :{}",
            options.username, options.realname
        ))
        .await?;

        loop {
            let line = self.next_line().await?;
            tracing::debug!("IRC <- {line}");
            if line.contains("Closing Link") {
                return Err(SessionError::ServerError(line));
            }
            let Some(msg) = IrcMessage::parse(&line) else {
                continue;
            };

            match msg.command.as_str() {
                "PING" => {
                    let token = msg.params.first().map_or("", String::as_str);
                    self.send_raw(&format!("PONG :{token}")).await?;
                }

                // RPL_WELCOME: registration complete
                "001" => {
                    tracing::info!(
                        "IRC registered as {} on {}",
                        self.nickname,
                        msg.prefix.as_deref().unwrap_or("server")
                    );

                    if let Some(ref pass) = options.nickserv_password {
                        self.send_raw(&format!("PRIVMSG NickServ :IDENTIFY {pass}"))
                            .await?;
                    }

                    if options.channels.is_empty() {
                        tracing::warn!("No IRC channels configured; commands will go unanswered");
                    }
                    for (i, chan) in options.channels.iter().enumerate() {
                        if i > 0 && !options.join_delay.is_zero() {
                            tokio::time::sleep(options.join_delay).await;
                        }
                        self.send_raw(&format!("JOIN {chan}")).await?;
                        self.joined.insert(chan.to_lowercase());
                    }
                    return Ok(());
                }

                // ERR_NICKNAMEINUSE
                "433" => {
                    let alt = format!("{}_", self.nickname);
                    tracing::warn!(
                        "IRC nickname {} is in use, trying {alt}",
                        self.nickname
                    );
                    self.nickname = alt;
                    self.send_raw(&format!("NICK {}", self.nickname)).await?;
                }

                // ERR_PASSWDMISMATCH
                "464" => {
                    return Err(SessionError::RegistrationRejected(
                        msg.trailing().to_string(),
                    ));
                }

                "ERROR" => {
                    return Err(SessionError::ServerError(msg.trailing().to_string()));
                }

                _ => {}
            }
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Nickname the server accepted, which may differ from the configured one.
    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub fn is_joined(&self, destination: &str) -> bool {
        self.joined.contains(&destination.to_lowercase())
    }

    /// Read the next batch of inbound events.
    ///
    /// Every `PING` in the batch is answered before this returns, so callers
    /// never delay a keep-alive reply by processing chat first. Chat for
    /// destinations the session has not joined is dropped. Any failure moves
    /// the session to [`SessionState::Disconnected`].
    pub async fn next_events(&mut self) -> Result<Vec<InboundEvent>, SessionError> {
        if self.state != SessionState::Ready {
            return Err(SessionError::NotConnected);
        }
        let result = self.read_batch().await;
        if result.is_err() {
            self.state = SessionState::Disconnected;
        }
        result
    }

    async fn read_batch(&mut self) -> Result<Vec<InboundEvent>, SessionError> {
        let mut lines: Vec<String> = self.framer.lines().collect();
        while lines.is_empty() {
            self.fill().await?;
            lines = self.framer.lines().collect();
        }

        let events: Vec<InboundEvent> = lines
            .iter()
            .inspect(|line| tracing::debug!("IRC <- {line}"))
            .map(|line| InboundEvent::parse(line))
            .collect();

        for event in &events {
            if let InboundEvent::Ping(token) = event {
                self.send_raw(&format!("PONG :{token}")).await?;
            }
        }

        let mut out = Vec::with_capacity(events.len());
        for event in events {
            match event {
                InboundEvent::Ping(_) => {}
                InboundEvent::ChatMessage(chat) => {
                    if self.is_joined(&chat.destination) {
                        out.push(InboundEvent::ChatMessage(chat));
                    } else {
                        tracing::debug!(
                            "Ignoring message from {} to unjoined {}",
                            chat.sender,
                            chat.destination
                        );
                    }
                }
                InboundEvent::Unrecognized(line) => {
                    if let Some(msg) = IrcMessage::parse(&line).filter(|m| m.command == "ERROR") {
                        return Err(SessionError::ServerError(msg.trailing().to_string()));
                    }
                    out.push(InboundEvent::Unrecognized(line));
                }
            }
        }
        Ok(out)
    }

    /// Send one `PRIVMSG`, waiting out the minimum spacing since the last one.
    pub async fn send_privmsg(&mut self, target: &str, text: &str) -> Result<(), SessionError> {
        if self.state != SessionState::Ready {
            return Err(SessionError::NotConnected);
        }

        if let Some(last) = self.last_chat_send {
            tokio::time::sleep_until(last + self.send_delay).await;
        }

        // A stray newline would end the PRIVMSG and inject a raw command.
        let text = text.replace(['\r', '\n'], " ");
        let result = self.send_raw(&format!("PRIVMSG {target} :{text}")).await;
        self.last_chat_send = Some(Instant::now());
        if result.is_err() {
            self.state = SessionState::Disconnected;
        }
        result
    }

    /// The error that broke the last failed [`Channel::send`], if any.
    pub fn take_send_failure(&mut self) -> Option<SessionError> {
        self.send_failure.take()
    }

    /// Leave the network. The session is unusable afterwards.
    pub async fn quit(&mut self, reason: &str) -> Result<(), SessionError> {
        if self.state == SessionState::Disconnected {
            return Ok(());
        }
        self.state = SessionState::Disconnected;
        self.send_raw(&format!("QUIT :{reason}")).await?;
        self.stream.shutdown().await?;
        Ok(())
    }

    /// Next complete line, reading from the transport only when none is buffered.
    async fn next_line(&mut self) -> Result<String, SessionError> {
        loop {
            if let Some(line) = self.framer.lines().next() {
                return Ok(line);
            }
            self.fill().await?;
        }
    }

    async fn fill(&mut self) -> Result<(), SessionError> {
        let mut buf = [0u8; READ_CHUNK];
        let n = tokio::time::timeout(READ_TIMEOUT, self.stream.read(&mut buf))
            .await
            .map_err(|_| SessionError::ReadTimeout(READ_TIMEOUT))??;
        if n == 0 {
            return Err(SessionError::Closed);
        }
        if let Err(e) = self.framer.push(&buf[..n]) {
            tracing::warn!("IRC framing error: {e}");
        }
        Ok(())
    }

    /// Send a raw IRC line (appends \r\n).
    async fn send_raw(&mut self, line: &str) -> Result<(), SessionError> {
        tracing::debug!("IRC -> {}", redact(line));
        let data = format!("{line}{LINE_TERMINATOR}");
        self.stream.write_all(data.as_bytes()).await?;
        self.stream.flush().await?;
        Ok(())
    }
}

/// Hide credentials in outbound lines before they reach the log.
fn redact(line: &str) -> String {
    if line.starts_with("PASS ") {
        "PASS ********".to_string()
    } else if line.starts_with("PRIVMSG NickServ :IDENTIFY ") {
        "PRIVMSG NickServ :IDENTIFY ********".to_string()
    } else {
        line.to_string()
    }
}

#[async_trait]
impl<S> Channel for IrcSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn name(&self) -> &str {
        "irc"
    }

    async fn send(&mut self, message: &SendMessage) -> anyhow::Result<()> {
        match self.send_privmsg(&message.recipient, &message.content).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let err = anyhow::anyhow!("{e}");
                self.send_failure.get_or_insert(e);
                Err(err)
            }
        }
    }
}

// ── Transport ────────────────────────────────────────────────────

/// Open a TLS connection and register with the configured identity.
pub async fn connect(config: &IrcConfig) -> Result<IrcSession<TlsStream>, SessionError> {
    tracing::info!(
        "IRC connecting to {}:{} as {}...",
        config.server,
        config.port,
        config.nickname
    );
    if !config.verify_tls {
        tracing::warn!(
            "TLS certificate verification is disabled for {}; the connection is not authenticated",
            config.server
        );
    }

    let tls = connect_tls(&config.server, config.port, config.verify_tls).await?;
    IrcSession::register(tls, &SessionOptions::from_config(config)).await
}

/// Create a TLS connection to the IRC server.
async fn connect_tls(server: &str, port: u16, verify_tls: bool) -> Result<TlsStream, SessionError> {
    let addr = format!("{server}:{port}");

    let tls_config = if verify_tls {
        let root_store: rustls::RootCertStore =
            webpki_roots::TLS_SERVER_ROOTS.iter().cloned().collect();
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth()
    } else {
        rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerify))
            .with_no_client_auth()
    };

    let connector = tokio_rustls::TlsConnector::from(Arc::new(tls_config));
    let domain = rustls::pki_types::ServerName::try_from(server.to_string())
        .map_err(|_| SessionError::InvalidServerName(server.to_string()))?;

    let connecting = async {
        let tcp = TcpStream::connect(&addr)
            .await
            .map_err(|source| SessionError::Connect {
                addr: addr.clone(),
                source,
            })?;
        connector
            .connect(domain, tcp)
            .await
            .map_err(|source| SessionError::Connect {
                addr: addr.clone(),
                source,
            })
    };

    tokio::time::timeout(CONNECT_TIMEOUT, connecting)
        .await
        .map_err(|_| SessionError::ConnectTimeout(addr.clone()))?
}

/// Certificate verifier that accepts any certificate (for `verify_tls=false`).
#[derive(Debug)]
struct NoVerify;

impl rustls::client::danger::ServerCertVerifier for NoVerify {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
