//! Handshake phases: authentication and initialization.

use crate::error::{Error, Result};
use crate::protocol::backend::{
    AuthenticationMessage, BackendKeyData, ReadyForQuery, msg_type, parse_error_fields,
};
use crate::protocol::frontend::{md5_password, write_password};
use crate::types::DatetimeMode;

use super::{BackendKey, Driver, Phase, Reply};

impl Driver {
    /// Auth phase: answer `R` subcodes until AuthenticationOk. ParameterStatus
    /// and NoticeResponse can legally arrive here and are delegated to the
    /// steady-state handler.
    pub(super) fn on_auth_message(&mut self, tag: u8, payload: &[u8]) -> Result<()> {
        match tag {
            msg_type::AUTHENTICATION => match AuthenticationMessage::parse(payload)? {
                AuthenticationMessage::Ok => {
                    self.phase = Phase::Init;
                    Ok(())
                }
                AuthenticationMessage::CleartextPassword => {
                    match self.required_password() {
                        Ok(password) => write_password(&mut self.outbound, &password),
                        Err(e) => self.fail_connect(e),
                    }
                    Ok(())
                }
                AuthenticationMessage::Md5Password { salt } => {
                    match self.required_password() {
                        Ok(password) => {
                            let hashed = md5_password(&self.user, &password, &salt);
                            write_password(&mut self.outbound, &hashed);
                        }
                        Err(e) => self.fail_connect(e),
                    }
                    Ok(())
                }
                AuthenticationMessage::Unsupported { subcode } => {
                    let method = AuthenticationMessage::method_name(subcode);
                    self.fail_connect(Error::UnsupportedAuth(method.to_string()));
                    Ok(())
                }
            },
            msg_type::ERROR_RESPONSE => {
                let error = Self::auth_error(payload)?;
                self.fail_connect(error);
                Ok(())
            }
            _ => self.on_ready_message(tag, payload),
        }
    }

    /// Init phase: collect ParameterStatus and BackendKeyData, finish on the
    /// first ReadyForQuery.
    pub(super) fn on_init_message(&mut self, tag: u8, payload: &[u8]) -> Result<()> {
        match tag {
            msg_type::PARAMETER_STATUS => {
                let status = crate::protocol::backend::ParameterStatus::parse(payload)?;
                self.parameters
                    .insert(status.name.to_string(), status.value.to_string());
                Ok(())
            }
            msg_type::BACKEND_KEY_DATA => {
                let key = BackendKeyData::parse(payload)?;
                self.backend_key = Some(BackendKey {
                    pid: key.process_id(),
                    secret: key.secret_key(),
                });
                Ok(())
            }
            msg_type::READY_FOR_QUERY => {
                let ready = ReadyForQuery::parse(payload)?;
                self.tx_status = ready.transaction_status().unwrap_or_default();
                self.datetime_mode = self
                    .parameters
                    .get("integer_datetimes")
                    .map(|v| DatetimeMode::from_parameter(v))
                    .unwrap_or_default();
                if self.backend_key.is_none() {
                    // Connection proxies may omit BackendKeyData; only cancel
                    // is degraded.
                    tracing::warn!("no BackendKeyData received before ReadyForQuery");
                }
                self.phase = Phase::Ready;
                tracing::debug!(user = %self.user, "connection ready");
                self.finish_head(Ok(Reply::Connected));
                Ok(())
            }
            msg_type::ERROR_RESPONSE => {
                let error = Self::auth_error(payload)?;
                self.fail_connect(error);
                Ok(())
            }
            msg_type::NOTICE_RESPONSE => self.on_ready_message(tag, payload),
            _ => Err(Error::Protocol(format!(
                "unexpected message during startup: '{}'",
                tag as char
            ))),
        }
    }

    /// Map an auth-time ErrorResponse to the dedicated credential errors.
    fn auth_error(payload: &[u8]) -> Result<Error> {
        let fields = parse_error_fields(payload)?;
        Ok(match fields.sqlstate() {
            "28000" => Error::InvalidAuthorization,
            "28P01" => Error::InvalidPassword,
            _ => fields.into(),
        })
    }

    fn required_password(&self) -> Result<String> {
        self.password
            .clone()
            .ok_or_else(|| Error::InvalidUsage("password required but not provided".into()))
    }

    /// Fail the pending connect request and stop; the transport is torn down
    /// by the I/O task.
    fn fail_connect(&mut self, error: Error) {
        if let Some(mut request) = self.queue.pop_front() {
            request.sink.finish(Err(error));
        }
        self.terminated = true;
    }
}
