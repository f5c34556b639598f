//! Dispatch of data frames: fan-out to stream functions, broadcast to
//! downstream zippers, backflow to sources.

use std::sync::atomic::Ordering;

use thiserror::Error;
use tracing::{debug, error, warn};
use zipper_proto::{BackflowFrame, Frame};

use crate::{
    connection::{ClientType, ConnId, FrameWriter},
    context::Context,
    metadata::MetadataError,
    server::Server,
};

/// Why a data frame could not be dispatched. These errors close the
/// producing stream with code `Data`; per-target write failures do not
/// surface here.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The producing connection is not registered.
    #[error("connector cannot find {0}")]
    UnknownConnection(ConnId),

    /// The frame's metadata bytes did not decode.
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    /// The router has no route for the frame's metadata.
    #[error("no route for the frame's metadata")]
    NoRoute,

    /// A server collaborator is missing (only reachable when dispatch is
    /// driven outside `serve`, which validates configuration up front).
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    /// Writing a backflow result to a source failed.
    #[error("write backflow to source {source_id}: {source}")]
    Backflow {
        /// Client id of the source the write was addressed to.
        source_id: String,
        /// Underlying write failure.
        #[source]
        source: std::io::Error,
    },
}

impl Server {
    /// Forward a data frame to every stream function observing its tag.
    ///
    /// Counts the frame first: the stats counter moves by exactly one per
    /// data frame regardless of fan-out success.
    pub(crate) async fn handle_data_frame(&self, ctx: &Context) -> Result<(), DispatchError> {
        let Frame::Data(frame) = &ctx.frame else {
            return Ok(());
        };
        self.counter_of_data_frame.fetch_add(1, Ordering::Relaxed);

        let from = self.connector.get(&ctx.conn_id).ok_or_else(|| {
            warn!(conn_id = %ctx.conn_id, "data frame from unregistered connection");
            DispatchError::UnknownConnection(ctx.conn_id.clone())
        })?;

        let (router, builder) = {
            let state = self.state();
            (state.router.clone(), state.metadata_builder.clone())
        };
        let builder = builder.ok_or(DispatchError::NotConfigured("metadata builder"))?;
        let router = router.ok_or(DispatchError::NotConfigured("router"))?;

        // Frames with no metadata bytes inherit the producing connection's.
        let metadata = match builder.decode(&frame.meta.metadata)? {
            Some(metadata) => Some(metadata),
            None => from.metadata().cloned(),
        };

        let route = router.route(metadata.as_deref()).ok_or_else(|| {
            warn!(conn_id = %ctx.conn_id, "no route for data frame");
            DispatchError::NoRoute
        })?;

        for to_id in route.forward_routes(frame.tag()) {
            let Some(to) = self.connector.get(&to_id) else {
                error!(conn_id = %to_id, "forward target not in connector");
                continue;
            };
            debug!(
                from = %from.name(),
                from_conn = %ctx.conn_id,
                to = %to.name(),
                to_conn = %to_id,
                tag = frame.tag(),
                "forward data frame"
            );
            if let Err(e) = to.write_frame(&ctx.frame).await {
                warn!(conn_id = %to_id, error = %e, "write data frame");
            }
        }

        Ok(())
    }

    /// Fan a broadcast data frame out to every downstream zipper.
    ///
    /// Only broadcast frames from sources leave the local zipper; the
    /// meta frame's metadata is populated from the source's metadata when
    /// the producer left it empty, so downstreams can route without the
    /// originating handshake.
    pub(crate) async fn dispatch_to_downstreams(&self, ctx: &Context) {
        let Some(from) = self.connector.get(&ctx.conn_id) else {
            debug!(conn_id = %ctx.conn_id, "dispatch to downstreams: connection not found");
            return;
        };
        if from.client_type() != ClientType::Source {
            return;
        }
        let Frame::Data(frame) = &ctx.frame else {
            return;
        };
        if !frame.is_broadcast() {
            debug!(
                conn_id = %ctx.conn_id,
                transaction_id = %frame.transaction_id(),
                "frame is local only"
            );
            return;
        }

        let mut frame = frame.clone();
        if frame.meta.metadata.is_empty() {
            if let Some(metadata) = from.metadata() {
                frame.meta.metadata = metadata.encode();
            }
        }

        let downstreams = self.state().downstreams.clone();
        let frame = Frame::Data(frame);
        for (addr, downstream) in &downstreams {
            debug!(downstream = %addr, conn_id = %ctx.conn_id, "dispatch to downstream");
            if let Err(e) = downstream.write_frame(&frame).await {
                warn!(downstream = %addr, error = %e, "write to downstream");
            }
        }
    }

    /// Return the frame's payload to every source matching its issuer and
    /// tag.
    pub(crate) async fn handle_backflow(&self, ctx: &Context) -> Result<(), DispatchError> {
        let Frame::Data(frame) = &ctx.frame else {
            return Ok(());
        };
        let tag = frame.tag();
        let backflow = Frame::Backflow(BackflowFrame::new(tag, frame.carriage().clone()));

        for source in self.connector.source_conns(frame.source_id(), tag) {
            debug!(source_id = %frame.source_id(), tag, "backflow to source");
            source.write_frame(&backflow).await.map_err(|e| DispatchError::Backflow {
                source_id: source.client_id().to_string(),
                source: e,
            })?;
        }
        Ok(())
    }
}
