//! Real PC/SC-backed [`CardTransport`], feature-gated behind `pcsc` (spec
//! §4.3). Establish-context, list-readers, connect, begin/end-transaction,
//! transmit, disconnect and release-context are all owned by the `pcsc`
//! crate; this module only adds reconnect-once-on-reset retry and reader
//! selection.

use pcsc::{Card, Context, Protocols, Scope as PcscScope, ShareMode};
use tracing::{debug, warn};

use crate::error::{PivError, Result};
use crate::transport::CardTransport;

/// Selects which reader to bind to when more than one is present.
pub enum ReaderSelector {
    /// Bind to the first reader the context reports.
    First,
    /// Bind to the reader whose name contains this substring.
    NameContains(String),
    /// Bind to an exact reader name.
    Exact(String),
}

/// A [`CardTransport`] bound to one physical reader via PC/SC.
pub struct PcscTransport {
    ctx: Context,
    reader_name: std::ffi::CString,
    reader_name_display: String,
    card: Card,
    in_transaction: bool,
}

impl PcscTransport {
    /// Establish a context, enumerate readers, and connect to the one
    /// `selector` picks. Fails with [`crate::error::PivErrorKind::NotFound`]
    /// if no reader matches, or [`crate::error::PivErrorKind::Io`] for any
    /// other PC/SC-layer failure.
    pub fn connect(selector: ReaderSelector) -> Result<Self> {
        let ctx = Context::establish(PcscScope::User)?;
        let reader_name = pick_reader(&ctx, selector)?;

        let reader_name_display = reader_name.to_string_lossy().into_owned();
        debug!(reader = %reader_name_display, "connecting to reader");
        let card = ctx.connect(&reader_name, ShareMode::Shared, Protocols::ANY)?;

        Ok(Self {
            ctx,
            reader_name,
            reader_name_display,
            card,
            in_transaction: false,
        })
    }

    fn reconnect(&mut self) -> Result<()> {
        warn!(reader = %self.reader_name_display, "reconnecting after card reset");
        self.card = self.ctx.connect(&self.reader_name, ShareMode::Shared, Protocols::ANY)?;
        Ok(())
    }
}

/// Connect to every reader the host reports, for use with
/// [`crate::token::enumerate`]/[`crate::token::find`]. A reader that fails
/// to connect (no card present, reader removed mid-enumeration) is skipped
/// with a warning rather than failing the whole call — the same
/// per-reader tolerance those two operations apply on top of this.
pub fn connect_all() -> Result<Vec<PcscTransport>> {
    let list_ctx = Context::establish(PcscScope::User)?;
    let mut buf = [0u8; 2048];
    let reader_names: Vec<std::ffi::CString> = list_ctx.list_readers(&mut buf)?.map(|r| r.to_owned()).collect();

    let mut transports = Vec::with_capacity(reader_names.len());
    for reader_name in reader_names {
        let reader_name_display = reader_name.to_string_lossy().into_owned();
        match connect_one(&reader_name, &reader_name_display) {
            Ok(transport) => transports.push(transport),
            Err(e) => warn!(reader = %reader_name_display, error = %e, "skipping reader during connect_all"),
        }
    }
    Ok(transports)
}

fn connect_one(reader_name: &std::ffi::CStr, reader_name_display: &str) -> Result<PcscTransport> {
    let ctx = Context::establish(PcscScope::User)?;
    debug!(reader = %reader_name_display, "connecting to reader");
    let card = ctx.connect(reader_name, ShareMode::Shared, Protocols::ANY)?;
    Ok(PcscTransport {
        ctx,
        reader_name: reader_name.to_owned(),
        reader_name_display: reader_name_display.to_string(),
        card,
        in_transaction: false,
    })
}

fn pick_reader(ctx: &Context, selector: ReaderSelector) -> Result<std::ffi::CString> {
    let mut buf = [0u8; 2048];
    let readers = ctx.list_readers(&mut buf)?;
    let mut readers: Vec<&std::ffi::CStr> = readers.collect();

    let chosen = match selector {
        ReaderSelector::First => readers.first().copied(),
        ReaderSelector::Exact(ref name) => readers
            .iter()
            .find(|r| r.to_string_lossy() == *name)
            .copied(),
        ReaderSelector::NameContains(ref needle) => readers
            .drain(..)
            .find(|r| r.to_string_lossy().contains(needle.as_str())),
    };

    chosen
        .map(|c| c.to_owned())
        .ok_or_else(|| PivError::not_found("no matching PC/SC reader present"))
}

impl CardTransport for PcscTransport {
    fn reader_name(&self) -> &str {
        &self.reader_name_display
    }

    fn begin_transaction(&mut self) -> Result<()> {
        if self.in_transaction {
            return Err(PivError::permission("transaction already open"));
        }
        self.card.begin_transaction()?;
        self.in_transaction = true;
        Ok(())
    }

    fn end_transaction(&mut self) -> Result<()> {
        if self.in_transaction {
            self.card.end_transaction(pcsc::Disposition::LeaveCard)?;
            self.in_transaction = false;
        }
        Ok(())
    }

    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>> {
        let mut reply_buf = vec![0u8; pcsc::MAX_BUFFER_SIZE_EXTENDED];

        match self.card.transmit(command, &mut reply_buf) {
            Ok(reply) => Ok(reply.to_vec()),
            Err(pcsc::Error::ResetCard) => {
                self.reconnect()?;
                let reply = self.card.transmit(command, &mut reply_buf)?;
                Ok(reply.to_vec())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn disconnect(&mut self) -> Result<()> {
        // `Card` disconnects on drop; nothing to do eagerly here beyond
        // ending any open transaction.
        self.end_transaction()
    }
}
