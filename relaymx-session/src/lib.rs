//! Ordered, per-session journal of session-modifying commands (`SET`, `USE`,
//! `BEGIN`, ...) replayed to every MySQL backend attached to a client
//! session, so a backend that joins mid-session converges on the same
//! connection state as backends that were there from the start.

mod arena;
mod command;
mod cursor;
mod error;
mod list;
mod semantics;
mod types;

pub use command::SessionCommand;
pub use cursor::Cursor;
pub use error::SclError;
pub use list::{AdvanceOutcome, AttachOutcome, SessionCommandList};
pub use semantics::{MustReply, OnError, OnMaxLenError, Properties, ReplyOn, Semantics};
pub use types::{BackendId, CommandId, Reply, ReplyKind};

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn list(semantics: Semantics) -> SessionCommandList {
        SessionCommandList::new(semantics, Properties::default())
    }

    #[test]
    fn late_attach_replays_history_in_order() {
        let scl = list(Semantics::default());
        let b1 = BackendId(1);
        scl.attach(b1);

        let c1 = scl.append(0x03, Bytes::from_static(b"SET autocommit=0")).unwrap();
        scl.advance(b1, Reply::ok(Bytes::new())).unwrap();
        let c2 = scl.append(0x03, Bytes::from_static(b"USE app")).unwrap();
        scl.advance(b1, Reply::ok(Bytes::new())).unwrap();

        let b2 = BackendId(2);
        let outcome = scl.attach(b2);
        assert!(outcome.needs_replay);

        let first = scl.current_for_replay(b2).unwrap().unwrap();
        assert_eq!(first.id, c1.id);
        let res = scl.advance(b2, Reply::ok(Bytes::new())).unwrap();
        assert!(res.to_forward.is_none(), "replay must not forward to client");
        assert!(!res.entered_live);

        let second = scl.current_for_replay(b2).unwrap().unwrap();
        assert_eq!(second.id, c2.id);
        let res = scl.advance(b2, Reply::ok(Bytes::new())).unwrap();
        assert!(res.entered_live);
        assert!(scl.current_for_replay(b2).unwrap().is_none());
    }

    #[test]
    fn reply_on_first_forwards_once() {
        let scl = list(Semantics { reply_on: ReplyOn::First, must_reply: MustReply::All, on_error: OnError::Drop });
        let b1 = BackendId(1);
        let b2 = BackendId(2);
        scl.attach(b1);
        scl.attach(b2);
        scl.append(0x03, Bytes::from_static(b"SET autocommit=0")).unwrap();

        let r1 = scl.advance(b1, Reply::ok(Bytes::from_static(b"ok-1"))).unwrap();
        assert!(r1.to_forward.is_some());
        let r2 = scl.advance(b2, Reply::ok(Bytes::from_static(b"ok-2"))).unwrap();
        assert!(r2.to_forward.is_none(), "second reply must not re-forward");
    }

    #[test]
    fn reply_on_last_waits_for_all() {
        let scl = list(Semantics { reply_on: ReplyOn::Last, must_reply: MustReply::All, on_error: OnError::Drop });
        let b1 = BackendId(1);
        let b2 = BackendId(2);
        scl.attach(b1);
        scl.attach(b2);
        scl.append(0x03, Bytes::from_static(b"SET autocommit=0")).unwrap();

        let r1 = scl.advance(b1, Reply::ok(Bytes::from_static(b"ok-1"))).unwrap();
        assert!(r1.to_forward.is_none());
        let r2 = scl.advance(b2, Reply::ok(Bytes::from_static(b"ok-2"))).unwrap();
        let forwarded = r2.to_forward.expect("settles once all backends replied");
        assert_eq!(forwarded.payload, Bytes::from_static(b"ok-2"));
    }

    #[test]
    fn all_ok_forwards_first_error_on_divergence() {
        let scl = list(Semantics { reply_on: ReplyOn::AllOk, must_reply: MustReply::All, on_error: OnError::Drop });
        let b1 = BackendId(1);
        let b2 = BackendId(2);
        scl.attach(b1);
        scl.attach(b2);
        scl.append(0x03, Bytes::from_static(b"SET autocommit=0")).unwrap();

        scl.advance(b1, Reply::ok(Bytes::new())).unwrap();
        let r2 = scl.advance(b2, Reply::err(Bytes::from_static(b"err"))).unwrap();
        let forwarded = r2.to_forward.expect("settles once all backends replied");
        assert!(matches!(forwarded.kind, ReplyKind::Err));
    }

    #[test]
    fn divergent_reply_after_forward_aborts_session() {
        let scl = list(Semantics { reply_on: ReplyOn::First, must_reply: MustReply::All, on_error: OnError::Abort });
        let b1 = BackendId(1);
        let b2 = BackendId(2);
        scl.attach(b1);
        scl.attach(b2);
        scl.append(0x03, Bytes::from_static(b"SET autocommit=0")).unwrap();

        scl.advance(b1, Reply::ok(Bytes::new())).unwrap();
        assert!(!scl.is_poisoned());
        let r2 = scl.advance(b2, Reply::err(Bytes::new())).unwrap();
        assert!(r2.poisoned);
        assert!(scl.is_poisoned());
    }

    #[test]
    fn history_is_retained_by_default_for_future_late_attaches() {
        let scl = list(Semantics::default());
        let b1 = BackendId(1);
        scl.attach(b1);
        scl.append(0x03, Bytes::from_static(b"SET autocommit=0")).unwrap();
        scl.advance(b1, Reply::ok(Bytes::new())).unwrap();
        assert_eq!(scl.len(), 1, "settled commands stay around for backends that haven't attached yet");

        let b2 = BackendId(2);
        assert!(scl.attach(b2).needs_replay);
    }

    #[test]
    fn drop_first_evicts_under_capacity_and_skips_lagging_cursors() {
        let mut props = Properties::default();
        props.max_len = 1;
        props.on_mlen_err = OnMaxLenError::DropFirst;
        let scl = SessionCommandList::new(Semantics::default(), props);
        let b1 = BackendId(1);
        scl.attach(b1);
        scl.append(0x03, Bytes::from_static(b"SET a=1")).unwrap();
        // b1 never replays the first command; a second append forces it out under capacity.
        let second = scl.append(0x03, Bytes::from_static(b"SET b=1")).unwrap();
        assert_eq!(scl.len(), 1);
        assert!(!scl.current_for_replay(b1).unwrap().is_some(), "b1 was live, not replaying, when the gap was skipped");

        let b2 = BackendId(2);
        assert!(scl.attach(b2).needs_replay);
        let pending = scl.current_for_replay(b2).unwrap().unwrap();
        assert_eq!(pending.id, second.id, "late attach only sees what survived eviction");
    }

    #[test]
    fn capacity_reject_new_errors_on_append() {
        let mut props = Properties::default();
        props.max_len = 1;
        props.on_mlen_err = OnMaxLenError::RejectNew;
        let scl = SessionCommandList::new(Semantics::default(), props);
        let b1 = BackendId(1);
        scl.attach(b1);
        scl.append(0x03, Bytes::from_static(b"SET a=1")).unwrap();
        let err = scl.append(0x03, Bytes::from_static(b"SET b=1"));
        assert!(matches!(err, Err(SclError::CapacityExceeded(1))));
    }
}
