// SPDX-License-Identifier: Apache-2.0

//! ## How it works
//!
//! Bytes move through fixed-capacity, wrap-around *buffers*. A buffer keeps two
//! regions behind a single read cursor: *pending input* (received, not yet
//! consumed by the next stage) and *pending output* (accepted for transmission,
//! not yet delivered). Folding input into output is an O(1) cursor move, never
//! a copy, and output bytes are never treated as free space until the transport
//! acknowledges them.
//!
//! Buffers come from a bounded *pool*. Acquisition is margin-guaranteed: a
//! buffer is only handed out if doing so leaves a minimum number of free
//! buffers behind, so a burst of single-buffer sessions cannot starve a session
//! that structurally needs two buffers to make progress. When the pool is
//! exhausted, callers are handed a `Wanted` marker instead of an error and park
//! a wakeup callback in the pool's wait queue; releasing a buffer offers it to
//! the first eligible waiter.
//!
//! A *stream connector* joins an application (a proxied stream or a health
//! check) to an endpoint (a multiplexed connection or an in-process applet)
//! without either side knowing the other's concrete type. The connector
//! mediates attach/detach, forwards half-duplex shutdowns, and carries the
//! need/have back-pressure flags plus the activity timestamps the surrounding
//! scheduler uses for timeout enforcement.
//!
//! The `quic` module provides the canonical consumer of both subsystems: a
//! per-stream flow-control record accounting bytes received, queued, sent and
//! acknowledged against stream- and connection-level ceilings.

mod flags;

pub mod buffer;
pub mod connector;
pub mod endpoint;
pub mod error;
pub mod pool;
pub mod quic;

pub use buffer::{Buffer, BufferSlot, PrefixMatch};
pub use connector::{
	App, Application, AttachError, DetachState, ScFlags, StreamConnector, TransferOps,
};
pub use endpoint::{
	AppletOps, Endpoint, IoEvents, MuxOps, RawConnection, SeFlags, Sedesc, ShutR, ShutW,
};
pub use pool::{BufPool, PoolConfig, WaiterId};
pub use quic::{QuicAppOps, QuicConnFlow, QuicStream};

/// Default per-buffer capacity, matching the usual proxy buffer size.
pub const DEFAULT_BUF_SIZE: usize = 16 * 1024;
