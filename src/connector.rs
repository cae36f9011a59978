// SPDX-License-Identifier: Apache-2.0

//! The stream connector: the object an application layer holds to exchange
//! bytes with an endpoint it never sees the concrete type of.
//!
//! A connector is valid while at least one side (endpoint or application) is
//! attached. Detaching one side keeps the connector alive for the other;
//! detaching the second side destroys it, which the detach methods report
//! through [`DetachState`] so the owner knows when to drop it. Shutdown is
//! half-duplex and idempotent per direction. The need/have back-pressure
//! flags are cleared exactly once by the matching `have_*` call, and clearing
//! one records read activity, because releasing back-pressure is itself
//! forward progress for idle-timeout purposes.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace};
use crate::endpoint::{AppletOps, Endpoint, IoEvents, SeFlags, Sedesc, ShutR, ShutW};
use crate::flags::bitset;
use crate::pool::WaiterId;

#[derive(Copy, Clone, Debug, thiserror::Error)]
#[error("applet initialization refused the attach")]
pub struct AttachError;

bitset! {
	/// Connector-side state flags.
	pub struct ScFlags {
		/// Failed to get an input buffer, waiting for one.
		const NEED_BUFF = 0x01;
		/// Failed to put data for lack of room in the input buffer.
		const NEED_ROOM = 0x02;
		/// The application will not read from the endpoint for now.
		const WONT_READ = 0x04;
	}
}

/// Wake hook an application supplies so activity can be reported back to it.
pub trait Application: Send {
	fn wake(&mut self);
}

/// The application side of a connector: a proxied stream or a health check.
pub enum App {
	Stream(Box<dyn Application>),
	Check(Box<dyn Application>),
}

impl App {
	pub fn is_stream(&self) -> bool { matches!(self, Self::Stream(_)) }
}

/// Which data-transfer operation set the connector currently uses, chosen
/// from the attached endpoint and application kinds.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum TransferOps {
	/// Nothing attached that can transfer data.
	#[default]
	None,
	/// Direct mux-connection I/O.
	Conn,
	/// Applet-mediated I/O.
	Applet,
	/// Degenerate case: a stream with no endpoint yet.
	Embedded,
}

/// Whether a detach destroyed the connector or left it half-attached.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DetachState {
	/// The other side is still attached; the connector lives on.
	Kept,
	/// Both sides are gone; the owner must drop the connector now.
	Destroyed,
}

fn fresh_token() -> u64 {
	static NEXT: AtomicU64 = AtomicU64::new(1);
	NEXT.fetch_add(1, Ordering::Relaxed)
}

/// A stream connector. Held and driven by the application layer; the endpoint
/// layer shares only the [`Sedesc`].
pub struct StreamConnector {
	sd: Arc<Sedesc>,
	endpoint: Option<Endpoint>,
	app: Option<App>,
	ops: TransferOps,
	flags: ScFlags,
	ioto: Duration,
	token: u64,
	wait_id: WaiterId,
}

impl StreamConnector {
	fn new() -> Self {
		let token = fresh_token();
		let sd = Arc::new(Sedesc::new());
		sd.bind_owner(token);
		Self {
			sd,
			endpoint: None,
			app: None,
			ops: TransferOps::None,
			flags: ScFlags::NONE,
			ioto: Duration::from_secs(30),
			token,
			wait_id: WaiterId::fresh(),
		}
	}

	/// Creates a connector already bound to an endpoint, as a mux or applet
	/// layer does when accepting a new stream.
	pub fn new_from_endpoint(endpoint: Endpoint) -> Self {
		let mut sc = Self::new();
		sc.attach_endpoint(endpoint);
		sc
	}

	/// Creates a connector already bound to an application, for outgoing
	/// streams that will connect an endpoint later.
	pub fn new_from_application(app: App) -> Self {
		let mut sc = Self::new();
		sc.attach_app(app);
		sc
	}

	/// The shared endpoint descriptor.
	pub fn sd(&self) -> &Arc<Sedesc> { &self.sd }

	/// This connector's lookup token, matching [`Sedesc::owner`].
	pub fn token(&self) -> u64 { self.token }

	/// The identity this connector waits and subscribes under, shared by the
	/// pool wait queue and mux event subscriptions.
	pub fn wait_id(&self) -> WaiterId { self.wait_id }

	pub fn transfer_ops(&self) -> TransferOps { self.ops }

	pub fn flags(&self) -> ScFlags { self.flags }

	pub fn has_endpoint(&self) -> bool { self.endpoint.is_some() }

	pub fn has_app(&self) -> bool { self.app.is_some() }

	pub fn io_timeout(&self) -> Duration { self.ioto }

	pub fn set_io_timeout(&mut self, ioto: Duration) {
		self.ioto = ioto;
	}

	/// Binds an endpoint and selects the matching transfer operation set.
	pub fn attach_endpoint(&mut self, endpoint: Endpoint) {
		assert!(self.endpoint.is_none(), "connector already has an endpoint");
		debug!(token = self.token, kind = ?endpoint.kind(), "attach endpoint");
		self.endpoint = Some(endpoint);
		self.select_ops();
	}

	/// Binds an applet endpoint, running its `init` hook first. The applet is
	/// only attached if `init` accepts; a refusal leaves the connector as it
	/// was and drops the applet.
	pub fn attach_applet(&mut self, mut applet: Box<dyn AppletOps>) -> Result<(), AttachError> {
		assert!(self.endpoint.is_none(), "connector already has an endpoint");
		if !applet.init(&self.sd) {
			debug!(token = self.token, "applet refused the attach");
			return Err(AttachError);
		}
		self.attach_endpoint(Endpoint::Applet(applet));
		Ok(())
	}

	/// Binds an application and selects the matching transfer operation set.
	pub fn attach_app(&mut self, app: App) {
		assert!(self.app.is_none(), "connector already has an application");
		debug!(token = self.token, stream = app.is_stream(), "attach application");
		self.app = Some(app);
		self.select_ops();
	}

	fn select_ops(&mut self) {
		self.ops = match (&self.app, &self.endpoint) {
			(None, _) => TransferOps::None,
			(Some(_), None) => TransferOps::Embedded,
			(Some(_), Some(Endpoint::Conn { .. })) => TransferOps::Conn,
			(Some(_), Some(Endpoint::Applet(_))) => TransferOps::Applet,
		};
	}

	/// Detaches the endpoint. For a connection with a mux, the mux's detach
	/// hook runs (after unsubscribing); for a connection no mux owns yet, the
	/// connector itself closes the raw connection; for an applet, its release
	/// hook runs. Endpoint flags reset to the neutral baseline. Panics if no
	/// endpoint was attached.
	pub fn detach_endpoint(&mut self) -> DetachState {
		let Some(endpoint) = self.endpoint.take() else {
			panic!("detaching an endpoint that was never attached");
		};
		debug!(token = self.token, "detach endpoint");

		match endpoint {
			Endpoint::Conn { mux: Some(mut mux), .. } => {
				mux.unsubscribe(IoEvents::ALL, self.wait_id);
				mux.detach(&self.sd);
			}
			Endpoint::Conn { mux: None, mut raw } => {
				// Too early to have a mux; the connection is ours to close.
				raw.close();
			}
			Endpoint::Applet(mut applet) => {
				applet.release();
			}
		}

		self.sd.reset();
		self.sd.clear_owner();
		self.select_ops();

		if self.app.is_none() {
			DetachState::Destroyed
		} else {
			DetachState::Kept
		}
	}

	/// Detaches the application. Panics if no application was attached: that
	/// is a lifecycle bug on the caller's side, and continuing would let a
	/// half-dead connector be used. Returns `Destroyed` once the endpoint is
	/// also gone.
	pub fn detach_app(&mut self) -> DetachState {
		if self.app.take().is_none() {
			panic!("detaching an application that was never attached");
		}
		debug!(token = self.token, "detach application");
		self.select_ops();

		if self.endpoint.is_none() {
			DetachState::Destroyed
		} else {
			DetachState::Kept
		}
	}

	/// Shuts the read direction. Idempotent: once either read-shut mode is
	/// recorded, further calls are no-ops. Delegates to the mux when the
	/// endpoint is a muxed connection.
	pub fn shutdown_read(&mut self, mode: ShutR) {
		if self.sd.test(SeFlags::SHUT_RD) {
			return;
		}
		trace!(token = self.token, ?mode, "shutdown read");

		if let Some(Endpoint::Conn { mux: Some(mux), .. }) = &mut self.endpoint {
			mux.shutdown_read(mode);
		}
		self.sd.set(match mode {
			ShutR::Drain => SeFlags::SHUT_RD_DRAIN,
			ShutR::Reset => SeFlags::SHUT_RD_RESET,
		});
	}

	/// Shuts the write direction. Idempotent, like [`shutdown_read`].
	///
	/// [`shutdown_read`]: Self::shutdown_read
	pub fn shutdown_write(&mut self, mode: ShutW) {
		if self.sd.test(SeFlags::SHUT_WR) {
			return;
		}
		trace!(token = self.token, ?mode, "shutdown write");

		if let Some(Endpoint::Conn { mux: Some(mux), .. }) = &mut self.endpoint {
			mux.shutdown_write(mode);
		}
		self.sd.set(match mode {
			ShutW::Normal => SeFlags::SHUT_WR_NORMAL,
			ShutW::Silent => SeFlags::SHUT_WR_SILENT,
		});
	}

	/// Completely closes both directions without detaching.
	pub fn shut(&mut self) {
		self.shutdown_write(ShutW::Silent);
		self.shutdown_read(ShutR::Reset);
	}

	/// Closes both directions, draining pending read data first.
	pub fn drain_and_shut(&mut self) {
		self.shutdown_write(ShutW::Silent);
		self.shutdown_read(ShutR::Drain);
	}

	/// The connector failed to get an input buffer and is waiting for one.
	pub fn need_buffer(&mut self) {
		self.flags.insert(ScFlags::NEED_BUFF);
	}

	/// The input buffer the connector waited for arrived. Clears the flag
	/// exactly once, and only a real clear counts as read activity.
	pub fn have_buffer(&mut self) {
		if self.flags.intersects(ScFlags::NEED_BUFF) {
			self.flags.remove(ScFlags::NEED_BUFF);
			self.sd.report_read_activity();
		}
	}

	/// The endpoint failed to deliver into the input buffer for lack of room.
	pub fn need_room(&mut self) {
		self.flags.insert(ScFlags::NEED_ROOM);
	}

	/// Room was made in the input buffer; failed deliveries may be retried.
	pub fn have_room(&mut self) {
		if self.flags.intersects(ScFlags::NEED_ROOM) {
			self.flags.remove(ScFlags::NEED_ROOM);
			self.sd.report_read_activity();
		}
	}

	/// Returns `true` if the receive path is blocked on input-buffer room.
	pub fn waiting_room(&self) -> bool {
		self.flags.intersects(ScFlags::NEED_ROOM)
	}

	/// The application will not read from the endpoint for now.
	pub fn wont_read(&mut self) {
		self.flags.insert(ScFlags::WONT_READ);
	}

	/// The application is willing to read again. Counts as read activity on
	/// the transition.
	pub fn will_read(&mut self) {
		if self.flags.intersects(ScFlags::WONT_READ) {
			self.flags.remove(ScFlags::WONT_READ);
			self.sd.report_read_activity();
		}
	}

	/// Receive-side expiry under this connector's I/O timeout.
	pub fn read_expiry(&self) -> Option<Instant> {
		self.sd.read_expiry(self.ioto)
	}

	/// Send-side expiry under this connector's I/O timeout.
	pub fn send_expiry(&self) -> Option<Instant> {
		self.sd.send_expiry(self.ioto)
	}
}
