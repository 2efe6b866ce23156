//! A single NWWS-OI XMPP connection: connect, authenticate, join the MUC,
//! and yield parsed products.
//!
//! Generalizes the teacher's `connection.rs::Connection` to emit
//! [`RawIngest`](crate::pipeline::types::RawIngest) pipeline events instead
//! of a standalone message type, and to track the last-message timestamp the
//! idle watchdog in [`super::run_once`] reads.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::{StreamExt, TryStreamExt};
use log::{debug, error, log_enabled, trace, warn, Level};

use crate::config::XmppConfig;
use crate::pipeline::types::RawIngest;

use super::parse::extract_raw_ingest;
use super::ReceiverError;

/// The fixed NWWS-OI multi-user chat room every receiver joins.
const MUC_DOMAIN: &str = "conference.nwws-oi.weather.gov";
const MUC_NODE: &str = "nwws";
const MUC_HISTORY_SECONDS: u32 = 300;
const MUC_MAX_HISTORY: u32 = 5;

pub(crate) struct XmppConnection {
    client: tokio_xmpp::SimpleClient,
    leave_message: xmpp_parsers::Element,
    last_message_time: Arc<Mutex<Instant>>,
}

impl XmppConnection {
    /// Connects, authenticates, and joins the NWWS MUC under `nickname`.
    /// Returns once the server has confirmed our own presence in the room.
    pub async fn connect(
        xmpp: &XmppConfig,
        nickname: &str,
        last_message_time: Arc<Mutex<Instant>>,
    ) -> Result<Self, ReceiverError> {
        let jid = format!("{}@{}/{}", xmpp.username, xmpp.server, nickname);

        debug!("connecting to {}", xmpp.server);
        let mut client = tokio_xmpp::SimpleClient::new(&jid, xmpp.password.clone())
            .await
            .map_err(|e| {
                error!("connection failed: {e}");
                match e {
                    tokio_xmpp::Error::JidParse(_) => ReceiverError::Configuration(e.to_string()),
                    tokio_xmpp::Error::Auth(_) => ReceiverError::Credentials(e),
                    _ => ReceiverError::Network(e),
                }
            })?;
        let own_jid = client.bound_jid().clone();
        debug!("connected as {own_jid}");

        let channel_jid = jid::FullJid {
            node: Some(MUC_NODE.into()),
            domain: MUC_DOMAIN.into(),
            resource: nickname.to_string(),
        };

        let join_message =
            xmpp_parsers::presence::Presence::new(xmpp_parsers::presence::Type::None)
                .with_from(own_jid.clone())
                .with_to(channel_jid.clone())
                .with_payloads(vec![xmpp_parsers::muc::Muc {
                    password: None,
                    history: Some(xmpp_parsers::muc::muc::History {
                        maxchars: None,
                        maxstanzas: Some(MUC_MAX_HISTORY),
                        seconds: Some(MUC_HISTORY_SECONDS),
                        since: None,
                    }),
                }
                .into()]);

        // https://xmpp.org/extensions/xep-0045.html#bizrules-presence § 17.3.2
        let leave_message =
            xmpp_parsers::presence::Presence::new(xmpp_parsers::presence::Type::Unavailable)
                .with_from(join_message.from.as_ref().expect("join presence has a from").clone())
                .with_to(join_message.to.as_ref().expect("join presence has a to").clone())
                .with_payloads(vec![xmpp_parsers::muc::Muc {
                    password: None,
                    history: None,
                }
                .into()])
                .into();

        debug!("joining channel {channel_jid}");
        client.send_stanza(join_message).await?;

        'wait_for_join: loop {
            let item = client.try_next().await?.ok_or(ReceiverError::StreamEnded)?;

            if let Ok(presence) = xmpp_parsers::presence::Presence::try_from(item.clone()) {
                for payload in presence.payloads {
                    if let Ok(muc_user) = xmpp_parsers::muc::MucUser::try_from(payload) {
                        if muc_user
                            .status
                            .iter()
                            .any(|s| s == &xmpp_parsers::muc::user::Status::SelfPresence)
                        {
                            break 'wait_for_join;
                        }
                    }
                }
            }
        }

        *last_message_time
            .lock()
            .expect("receiver last-message-time mutex poisoned") = Instant::now();

        Ok(Self {
            client,
            leave_message,
            last_message_time,
        })
    }

    /// Leaves the MUC and closes the stream, ignoring failures: there is no
    /// useful recovery from an error while tearing down an already-broken
    /// connection.
    pub async fn end(self) {
        let mut client = self.client;
        client.send_stanza(self.leave_message).await.ok();
        client.end().await.ok();
    }

    /// Waits for the next NWWS-OI product, handling and discarding every
    /// other stanza type (IQ pings, bare presence, banners) along the way.
    pub async fn next_raw_ingest(&mut self) -> Result<RawIngest, ReceiverError> {
        loop {
            let element = self.client.next().await.ok_or(ReceiverError::StreamEnded)??;

            if log_enabled!(Level::Trace) {
                let mut xml = Vec::new();
                if element.write_to(&mut std::io::Cursor::new(&mut xml)).is_ok() {
                    if let Ok(xml) = String::from_utf8(xml) {
                        trace!("received: {xml}");
                    }
                }
            }

            if element.is("message", "jabber:client") {
                if let Ok(message) = xmpp_parsers::message::Message::try_from(element) {
                    if let Some(raw) = extract_raw_ingest(message) {
                        *self
                            .last_message_time
                            .lock()
                            .expect("receiver last-message-time mutex poisoned") = Instant::now();
                        return Ok(raw);
                    }
                }
            } else if element.is("iq", "jabber:client") {
                let iq = xmpp_parsers::iq::Iq::try_from(element)?;
                self.handle_iq(iq).await?;
            } else if element.is("presence", "jabber:client") {
                trace!("presence stanza: {element:?}");
            } else {
                warn!("unhandled stanza: {element:?}");
            }
        }
    }

    async fn handle_iq(&mut self, iq: xmpp_parsers::iq::Iq) -> Result<(), ReceiverError> {
        // If an entity receives an IQ of type "get" or "set" containing a
        // child element qualified by a namespace it doesn't understand, it
        // SHOULD return <service-unavailable/>.
        match &iq.payload {
            xmpp_parsers::iq::IqType::Get(_) | xmpp_parsers::iq::IqType::Set(_) => {
                debug!(
                    "responding to IQ{} with service-unavailable",
                    iq.from
                        .as_ref()
                        .map(|j| format!(" from {j}"))
                        .unwrap_or_default()
                );

                let stanza = xmpp_parsers::iq::Iq {
                    from: iq.to,
                    to: iq.from,
                    id: iq.id,
                    payload: xmpp_parsers::iq::IqType::Error(
                        xmpp_parsers::stanza_error::StanzaError {
                            type_: xmpp_parsers::stanza_error::ErrorType::Cancel,
                            by: None,
                            defined_condition:
                                xmpp_parsers::stanza_error::DefinedCondition::ServiceUnavailable,
                            texts: Default::default(),
                            other: None,
                        },
                    ),
                };

                self.client.send_stanza(stanza).await?;
            }
            _ => {}
        }

        Ok(())
    }
}
