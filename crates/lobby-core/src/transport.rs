//! The seam between the room logic and whatever carries frames to clients.

use parking_lot::Mutex;

use crate::ids::ConnId;
use crate::messages::ServerEvent;

/// Outbound side of the event channel.
///
/// Sends are fire-and-forget: implementations queue the frame and return.
/// Delivery and backpressure belong to the implementation.
pub trait Transport: Send + Sync {
    /// Send to one client. Returns false if the frame was not queued.
    fn send(&self, conn: &ConnId, event: &ServerEvent) -> bool;

    /// Mark a connection as a session. Only admitted connections get broadcasts.
    fn admit(&self, conn: &ConnId);

    /// Send to every admitted client.
    fn broadcast(&self, event: &ServerEvent);

    /// Close one client after whatever is already queued for it.
    fn close(&self, conn: &ConnId);
}

/// One call observed by [`RecordingTransport`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Delivery {
    To(ConnId, ServerEvent),
    All(ServerEvent),
    Closed(ConnId),
}

/// Transport that records every call. Used by tests.
#[derive(Default)]
pub struct RecordingTransport {
    log: Mutex<Vec<Delivery>>,
    admitted: Mutex<Vec<ConnId>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.log.lock().clone()
    }

    /// Events sent directly to `conn`, in order.
    pub fn sent_to(&self, conn: &ConnId) -> Vec<ServerEvent> {
        self.log
            .lock()
            .iter()
            .filter_map(|d| match d {
                Delivery::To(c, e) if c == conn => Some(e.clone()),
                _ => None,
            })
            .collect()
    }

    /// Broadcast events, in order.
    pub fn broadcasts(&self) -> Vec<ServerEvent> {
        self.log
            .lock()
            .iter()
            .filter_map(|d| match d {
                Delivery::All(e) => Some(e.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn closed(&self) -> Vec<ConnId> {
        self.log
            .lock()
            .iter()
            .filter_map(|d| match d {
                Delivery::Closed(c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }

    /// Connections passed to `admit`, in order. Not cleared by [`clear`](Self::clear).
    pub fn admitted(&self) -> Vec<ConnId> {
        self.admitted.lock().clone()
    }

    pub fn clear(&self) {
        self.log.lock().clear();
    }
}

impl Transport for RecordingTransport {
    fn send(&self, conn: &ConnId, event: &ServerEvent) -> bool {
        self.log.lock().push(Delivery::To(conn.clone(), event.clone()));
        true
    }

    fn admit(&self, conn: &ConnId) {
        self.admitted.lock().push(conn.clone());
    }

    fn broadcast(&self, event: &ServerEvent) {
        self.log.lock().push(Delivery::All(event.clone()));
    }

    fn close(&self, conn: &ConnId) {
        self.log.lock().push(Delivery::Closed(conn.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::CloseCause;

    #[test]
    fn records_in_call_order() {
        let transport = RecordingTransport::new();
        let a = ConnId::new();
        let b = ConnId::new();

        transport.send(&a, &ServerEvent::Pulse(1000));
        transport.broadcast(&ServerEvent::Max(3));
        transport.send(&b, &ServerEvent::Bye(CloseCause::Busy));
        transport.close(&b);

        assert_eq!(transport.sent_to(&a), vec![ServerEvent::Pulse(1000)]);
        assert_eq!(transport.sent_to(&b), vec![ServerEvent::Bye(CloseCause::Busy)]);
        assert_eq!(transport.broadcasts(), vec![ServerEvent::Max(3)]);
        assert_eq!(transport.closed(), vec![b.clone()]);
        assert_eq!(transport.deliveries().len(), 4);

        transport.clear();
        assert!(transport.deliveries().is_empty());
    }

    #[test]
    fn admissions_stay_out_of_the_delivery_log() {
        let transport = RecordingTransport::new();
        let a = ConnId::new();

        transport.admit(&a);
        assert!(transport.deliveries().is_empty());
        transport.clear();
        assert_eq!(transport.admitted(), vec![a]);
    }
}
