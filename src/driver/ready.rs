//! Steady-state message handler for the simple and extended query flows.

use std::mem;

use crate::error::{Error, Result};
use crate::protocol::backend::{
    CommandComplete, NotificationResponse, ParameterDescription, ParameterStatus, ReadyForQuery,
    RowDescription, msg_type, parse_error_fields,
};
use crate::result::{AsyncMessage, QueryResult, StreamEvent};
use crate::statement::{Column, Statement};

use super::{Driver, Reply, RequestKind};

impl Driver {
    /// Dispatch one steady-state backend message. The head-of-queue
    /// request's kind decides how each event is consumed.
    pub(super) fn on_ready_message(&mut self, tag: u8, payload: &[u8]) -> Result<()> {
        match tag {
            // The reply to Parse is driven by the ParameterDescription and
            // RowDescription/NoData that follow it.
            msg_type::PARSE_COMPLETE => Ok(()),
            msg_type::PARAMETER_DESCRIPTION => {
                let desc = ParameterDescription::parse(payload)?;
                if let Some(head) = self.queue.front() {
                    head.sink
                        .event(StreamEvent::ParameterTypes(desc.param_oids.clone()));
                }
                self.acc.types = desc.param_oids;
                Ok(())
            }
            msg_type::ROW_DESCRIPTION => self.on_row_description(payload),
            msg_type::NO_DATA => self.on_no_data(),
            msg_type::BIND_COMPLETE => {
                // Terminal for bind; part of the pipeline for equery.
                if matches!(
                    self.queue.front(),
                    Some(super::Request {
                        kind: RequestKind::Bind,
                        ..
                    })
                ) {
                    self.finish_head(Ok(Reply::Done));
                }
                Ok(())
            }
            msg_type::CLOSE_COMPLETE => {
                if matches!(
                    self.queue.front(),
                    Some(super::Request {
                        kind: RequestKind::Close,
                        ..
                    })
                ) {
                    self.finish_head(Ok(Reply::Done));
                }
                Ok(())
            }
            msg_type::DATA_ROW => self.on_data_row(payload),
            msg_type::PORTAL_SUSPENDED => {
                let rows = mem::take(&mut self.acc.rows);
                // Streaming sinks already received the rows; their terminal
                // partial carries none.
                self.finish_head(Ok(Reply::Suspended(rows)));
                Ok(())
            }
            msg_type::COMMAND_COMPLETE => self.on_command_complete(payload),
            msg_type::EMPTY_QUERY_RESPONSE => self.on_empty_query(),
            msg_type::READY_FOR_QUERY => self.on_ready_for_query(payload),
            msg_type::ERROR_RESPONSE => self.on_error_response(payload),
            msg_type::NOTICE_RESPONSE => {
                let fields = parse_error_fields(payload)?;
                self.notify(AsyncMessage::Notice(fields));
                Ok(())
            }
            msg_type::PARAMETER_STATUS => {
                let status = ParameterStatus::parse(payload)?;
                self.parameters
                    .insert(status.name.to_string(), status.value.to_string());
                self.notify(AsyncMessage::ParameterChanged {
                    name: status.name.to_string(),
                    value: status.value.to_string(),
                });
                Ok(())
            }
            msg_type::NOTIFICATION_RESPONSE => {
                let notification = NotificationResponse::parse(payload)?;
                self.notify(AsyncMessage::Notification {
                    pid: notification.pid,
                    channel: notification.channel.to_string(),
                    payload: notification.payload.to_string(),
                });
                Ok(())
            }
            _ => Err(Error::Protocol(format!(
                "unexpected message: '{}'",
                tag as char
            ))),
        }
    }

    fn head_kind(&self) -> Result<RequestKind> {
        self.queue
            .front()
            .map(|request| request.kind.clone())
            .ok_or_else(|| Error::Protocol("backend message with no pending request".into()))
    }

    fn on_row_description(&mut self, payload: &[u8]) -> Result<()> {
        let desc = RowDescription::parse(payload)?;
        match self.head_kind()? {
            RequestKind::SimpleQuery | RequestKind::ExtendedQuery { .. } => {
                let columns: Vec<Column> = desc.fields.iter().map(Column::from_field).collect();
                if let Some(head) = self.queue.front() {
                    head.sink.event(StreamEvent::Columns(columns.clone()));
                }
                self.acc.columns = columns;
            }
            RequestKind::Parse { name } | RequestKind::DescribeStatement { name } => {
                let columns = desc
                    .fields
                    .iter()
                    .map(Column::with_preferred_format)
                    .collect();
                let statement = Statement {
                    name,
                    param_types: mem::take(&mut self.acc.types),
                    columns,
                };
                self.finish_head(Ok(Reply::Statement(statement)));
            }
            RequestKind::DescribePortal => {
                let columns = desc.fields.iter().map(Column::from_field).collect();
                self.finish_head(Ok(Reply::Columns(columns)));
            }
            kind => {
                return Err(Error::Protocol(format!(
                    "RowDescription for {kind:?} request"
                )));
            }
        }
        Ok(())
    }

    fn on_no_data(&mut self) -> Result<()> {
        match self.head_kind()? {
            RequestKind::Parse { name } | RequestKind::DescribeStatement { name } => {
                let statement = Statement {
                    name,
                    param_types: mem::take(&mut self.acc.types),
                    columns: Vec::new(),
                };
                self.finish_head(Ok(Reply::Statement(statement)));
            }
            RequestKind::DescribePortal => {
                self.finish_head(Ok(Reply::Columns(Vec::new())));
            }
            // A non-row statement in some other flow; nothing to record.
            _ => {}
        }
        Ok(())
    }

    fn on_data_row(&mut self, payload: &[u8]) -> Result<()> {
        let mode = self.datetime_mode;
        let Some(head) = self.queue.front_mut() else {
            return Err(Error::Protocol("DataRow with no pending request".into()));
        };
        // equery/execute decode against the statement's columns; simple
        // queries use the most recent RowDescription.
        let row = match &head.kind {
            RequestKind::ExtendedQuery { statement } | RequestKind::Execute { statement } => {
                crate::types::decode_row(payload, &statement.columns, mode)?
            }
            _ => crate::types::decode_row(payload, &self.acc.columns, mode)?,
        };
        if head.sink.is_stream() {
            head.sink.event(StreamEvent::Row(row));
        } else {
            self.acc.rows.push(row);
        }
        Ok(())
    }

    fn on_command_complete(&mut self, payload: &[u8]) -> Result<()> {
        let complete = CommandComplete::parse(payload)?;
        let rows_affected = complete.rows_affected();
        let tag = complete.tag.to_string();

        match self.head_kind()? {
            RequestKind::Execute { .. } => {
                let rows = mem::take(&mut self.acc.rows);
                self.finish_head(Ok(Reply::Rows(QueryResult {
                    rows_affected,
                    columns: Vec::new(),
                    rows,
                })));
            }
            kind @ (RequestKind::SimpleQuery | RequestKind::ExtendedQuery { .. }) => {
                let is_stream = self
                    .queue
                    .front()
                    .is_some_and(|request| request.sink.is_stream());
                if is_stream {
                    if let Some(head) = self.queue.front() {
                        head.sink.event(StreamEvent::Complete { tag, rows_affected });
                    }
                } else {
                    let columns = match &kind {
                        RequestKind::ExtendedQuery { statement } => statement.columns.clone(),
                        _ => mem::take(&mut self.acc.columns),
                    };
                    let rows = mem::take(&mut self.acc.rows);
                    self.acc.results.push(Ok(QueryResult {
                        rows_affected,
                        columns,
                        rows,
                    }));
                }
                // The request ends at ReadyForQuery; the next statement of a
                // batch starts with fresh scratch state.
                self.acc.rows.clear();
                self.acc.columns.clear();
            }
            kind => {
                return Err(Error::Protocol(format!(
                    "CommandComplete for {kind:?} request"
                )));
            }
        }
        Ok(())
    }

    fn on_empty_query(&mut self) -> Result<()> {
        match self.head_kind()? {
            RequestKind::Execute { .. } => {
                self.finish_head(Ok(Reply::Rows(QueryResult::default())));
            }
            RequestKind::SimpleQuery | RequestKind::ExtendedQuery { .. } => {
                if let Some(head) = self.queue.front()
                    && !head.sink.is_stream()
                {
                    self.acc.results.push(Ok(QueryResult::default()));
                }
            }
            kind => {
                return Err(Error::Protocol(format!(
                    "EmptyQueryResponse for {kind:?} request"
                )));
            }
        }
        Ok(())
    }

    fn on_ready_for_query(&mut self, payload: &[u8]) -> Result<()> {
        let ready = ReadyForQuery::parse(payload)?;
        self.tx_status = ready.transaction_status().unwrap_or_default();

        // A sync consumed by the error cascade still got its ReadyForQuery
        // from the backend.
        if self.owed_ready > 0 {
            self.owed_ready -= 1;
            return Ok(());
        }

        let Some(head) = self.queue.front() else {
            tracing::warn!("ReadyForQuery with no pending request");
            return Ok(());
        };
        match &head.kind {
            RequestKind::SimpleQuery => {
                let results = mem::take(&mut self.acc.results);
                self.finish_head(Ok(Reply::Batch(results)));
            }
            RequestKind::ExtendedQuery { .. } => {
                let mut results = mem::take(&mut self.acc.results);
                let reply = match results.pop() {
                    Some(Ok(result)) => Ok(Reply::Rows(result)),
                    Some(Err(server)) => Err(server.into()),
                    // Streaming sinks received their events already.
                    None => Ok(Reply::Rows(QueryResult::default())),
                };
                self.finish_head(reply);
            }
            _ => {
                // Sync, and any flow that already consumed its own terminal
                // message before the group's ReadyForQuery.
                self.finish_head(Ok(Reply::Done));
            }
        }
        Ok(())
    }

    fn on_error_response(&mut self, payload: &[u8]) -> Result<()> {
        let fields = parse_error_fields(payload)?;
        let Some(head) = self.queue.front_mut() else {
            // Server-initiated fatal error (e.g. shutdown); nothing to route
            // it to, so take the connection down.
            return Err(fields.into());
        };
        match &head.kind {
            RequestKind::SimpleQuery | RequestKind::ExtendedQuery { .. } => {
                // Attached to the batch; the terminating ReadyForQuery
                // delivers it.
                if head.sink.is_stream() {
                    head.sink.event(StreamEvent::Error(fields.into()));
                } else {
                    self.acc.results.push(Err(fields));
                }
                self.acc.rows.clear();
                self.acc.columns.clear();
            }
            _ => {
                self.finish_head(Err(fields.into()));
                self.cascade_sync_required();
            }
        }
        Ok(())
    }
}
