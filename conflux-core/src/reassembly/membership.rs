//! Two-phase barrier for emitter membership changes. The same membership
//! announcement arrives once per claimed partition group; the first copy arms
//! the barrier and becomes the installer, the rest signal it and hold their
//! partition until the install finishes. Between the first copy and the
//! install, every flush still runs under the old emitter set; after the
//! install, none does.

use tokio::sync::watch;
use tracing::warn;

use crate::message::MembershipUpdate;

/// Armed barrier, owned by the core while a membership change is in flight.
pub(crate) struct MetaBarrier {
    quiesce: watch::Sender<u32>,
    gate: watch::Sender<bool>,
}

/// What an ingress task must do, after releasing the core lock, for the meta
/// record it just observed.
#[derive(Debug)]
pub(crate) enum MetaAction {
    /// First arrival: wait out the remaining signals, then drain the old
    /// membership and install the new one.
    Install {
        quiesce: watch::Receiver<u32>,
        update: MembershipUpdate,
    },
    /// Later arrival: the signal is already delivered, wait for the
    /// installer to finish.
    Wait { gate: watch::Receiver<bool> },
}

impl MetaBarrier {
    /// Arms the barrier for `update.expected_signals` arrivals, the caller
    /// being the first.
    pub(crate) fn arm(update: MembershipUpdate) -> (MetaBarrier, MetaAction) {
        let (quiesce_tx, quiesce_rx) = watch::channel(update.expected_signals - 1);
        let (gate_tx, _) = watch::channel(true);
        (
            MetaBarrier {
                quiesce: quiesce_tx,
                gate: gate_tx,
            },
            MetaAction::Install {
                quiesce: quiesce_rx,
                update,
            },
        )
    }

    /// Records one more arrival of the same announcement.
    pub(crate) fn signal(&self) -> MetaAction {
        if *self.quiesce.borrow() == 0 {
            warn!("More meta record copies than announced signals, ignoring the extra one");
        } else {
            self.quiesce.send_modify(|remaining| *remaining -= 1);
        }
        MetaAction::Wait {
            gate: self.gate.subscribe(),
        }
    }

    /// Lets the waiting arrivals through; called once the new membership is
    /// installed.
    pub(crate) fn release(self) {
        self.gate.send_replace(false);
    }
}
