use pontis::bridge::{
    Completion, CompletionResult, Coordinator, SocketAction, SocketHook, TimerHook, Transfer,
    TransferConfig, TransferEngine, TransferTag,
};
use pontis::{EventLoop, Ready, RunMode};

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io::Write;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::rc::Rc;

/// A scripted transfer engine.
///
/// Records every call the coordinator makes and lets the test fire
/// the registered hooks the way a real engine would from inside its
/// step functions.
#[derive(Default)]
struct MockState {
    added: Vec<(TransferTag, TransferConfig)>,
    removed: Vec<TransferTag>,
    released: Vec<RawFd>,
    socket_steps: Vec<(RawFd, Ready)>,
    timeout_steps: u32,
    pending: VecDeque<TransferTag>,
    completions: VecDeque<Completion>,

    /// Ask for an immediate timeout from `add_transfer`, the way an
    /// engine kicks a fresh transfer off.
    kick_on_add: bool,

    /// Complete every pending transfer when the timeout step runs.
    complete_on_timeout: bool,
}

#[derive(Default)]
struct Hooks {
    socket: Option<SocketHook>,
    timer: Option<TimerHook>,
}

#[derive(Clone, Default)]
struct MockHandle {
    state: Rc<RefCell<MockState>>,
    hooks: Rc<RefCell<Hooks>>,
}

impl MockHandle {
    /// Simulates the engine requesting a socket-watch change.
    fn watch(&self, tag: TransferTag, socket: RawFd, action: SocketAction) {
        let mut hooks = self.hooks.borrow_mut();
        (hooks.socket.as_mut().expect("socket hook registered"))(tag, socket, action);
    }

    /// Simulates the engine updating its next deadline.
    fn timer(&self, timeout_ms: i64) {
        let mut hooks = self.hooks.borrow_mut();
        (hooks.timer.as_mut().expect("timer hook registered"))(timeout_ms);
    }

    fn push_completion(&self, tag: TransferTag, result: CompletionResult) {
        self.state
            .borrow_mut()
            .completions
            .push_back(Completion { tag, result });
    }

    fn last_tag(&self) -> TransferTag {
        self.state.borrow().added.last().expect("no transfer added").0
    }
}

struct MockEngine {
    state: Rc<RefCell<MockState>>,
    hooks: Rc<RefCell<Hooks>>,
}

fn mock_engine(kick_on_add: bool, complete_on_timeout: bool) -> (MockEngine, MockHandle) {
    let handle = MockHandle::default();
    {
        let mut state = handle.state.borrow_mut();
        state.kick_on_add = kick_on_add;
        state.complete_on_timeout = complete_on_timeout;
    }

    let engine = MockEngine {
        state: handle.state.clone(),
        hooks: handle.hooks.clone(),
    };

    (engine, handle)
}

impl TransferEngine for MockEngine {
    fn set_socket_hook(&mut self, hook: SocketHook) {
        self.hooks.borrow_mut().socket = Some(hook);
    }

    fn set_timer_hook(&mut self, hook: TimerHook) {
        self.hooks.borrow_mut().timer = Some(hook);
    }

    fn add_transfer(&mut self, config: &TransferConfig, tag: TransferTag) -> i32 {
        if config.url.as_deref() == Some("fail://nope") {
            return -5;
        }

        let kick = {
            let mut state = self.state.borrow_mut();
            state.added.push((tag, config.clone()));
            state.pending.push_back(tag);
            state.kick_on_add
        };

        if kick {
            let mut hooks = self.hooks.borrow_mut();
            (hooks.timer.as_mut().expect("timer hook registered"))(0);
        }

        0
    }

    fn remove_transfer(&mut self, tag: TransferTag) {
        self.state.borrow_mut().removed.push(tag);
    }

    fn release_socket(&mut self, socket: RawFd) {
        self.state.borrow_mut().released.push(socket);
    }

    fn drive_socket(&mut self, socket: RawFd, ready: Ready) -> i32 {
        self.state.borrow_mut().socket_steps.push((socket, ready));
        0
    }

    fn drive_timeout(&mut self) -> i32 {
        let mut state = self.state.borrow_mut();
        state.timeout_steps += 1;

        if state.complete_on_timeout {
            while let Some(tag) = state.pending.pop_front() {
                state.completions.push_back(Completion {
                    tag,
                    result: CompletionResult::Done { status: 0 },
                });
            }
        }

        0
    }

    fn next_completion(&mut self) -> Option<Completion> {
        self.state.borrow_mut().completions.pop_front()
    }
}

#[test]
fn watch_readable_creates_exactly_one_poll() {
    let lp = EventLoop::new();
    let (engine, mock) = mock_engine(false, false);
    let coord = Coordinator::new(&lp, engine);

    let transfer = Transfer::new();
    transfer.set_url("tcp://peer");
    assert_eq!(coord.register(&transfer), 0);
    let tag = mock.last_tag();

    let (a, b) = UnixStream::pair().unwrap();
    let fd = a.as_raw_fd();

    let base = lp.handle_count();
    mock.watch(tag, fd, SocketAction::WatchReadable);

    assert_eq!(lp.handle_count(), base + 1);
    assert_eq!(transfer.watched_socket(), Some(fd));

    (&b).write_all(b"x").unwrap();
    lp.run(RunMode::Poll);

    let steps = mock.state.borrow().socket_steps.clone();
    assert_eq!(
        steps,
        vec![(
            fd,
            Ready {
                readable: true,
                writable: false
            }
        )]
    );
}

#[test]
fn watch_both_restarts_the_same_poll() {
    let lp = EventLoop::new();
    let (engine, mock) = mock_engine(false, false);
    let coord = Coordinator::new(&lp, engine);

    let transfer = Transfer::new();
    assert_eq!(coord.register(&transfer), 0);
    let tag = mock.last_tag();

    let (a, b) = UnixStream::pair().unwrap();
    let fd = a.as_raw_fd();

    mock.watch(tag, fd, SocketAction::WatchReadable);
    let count = lp.handle_count();

    // Upgrading the interest reuses the poll; no duplicate handle.
    mock.watch(tag, fd, SocketAction::WatchBoth);
    assert_eq!(lp.handle_count(), count);

    (&b).write_all(b"x").unwrap();
    lp.run(RunMode::Poll);

    let steps = mock.state.borrow().socket_steps.clone();
    assert_eq!(steps.len(), 1, "coalesced into a single step");
    assert_eq!(steps[0].0, fd);
    assert!(steps[0].1.readable);
    assert!(steps[0].1.writable);
}

#[test]
fn unwatch_destroys_the_poll_and_repeating_it_is_a_noop() {
    let lp = EventLoop::new();
    let (engine, mock) = mock_engine(false, false);
    let coord = Coordinator::new(&lp, engine);

    let transfer = Transfer::new();
    assert_eq!(coord.register(&transfer), 0);
    let tag = mock.last_tag();

    let (a, _b) = UnixStream::pair().unwrap();
    let fd = a.as_raw_fd();

    let base = lp.handle_count();
    mock.watch(tag, fd, SocketAction::WatchReadable);
    assert_eq!(lp.handle_count(), base + 1);

    mock.watch(tag, fd, SocketAction::Unwatch);
    assert_eq!(lp.handle_count(), base);
    assert_eq!(transfer.watched_socket(), None);

    // The engine hears about the released socket exactly once, after
    // the next driving step.
    mock.timer(1);
    lp.run(RunMode::Default);
    assert_eq!(mock.state.borrow().released, vec![fd]);

    // A second stop-watching request is a no-op, not a fault.
    mock.watch(tag, fd, SocketAction::Unwatch);
    assert_eq!(lp.handle_count(), base);

    mock.timer(1);
    lp.run(RunMode::Default);
    assert_eq!(mock.state.borrow().released, vec![fd]);
}

#[test]
fn timer_hook_negative_disarms() {
    let lp = EventLoop::new();
    let (engine, mock) = mock_engine(false, false);
    let _coord = Coordinator::new(&lp, engine);

    mock.timer(100);
    assert!(lp.alive());

    mock.timer(-1);
    let alive = lp.run(RunMode::Default);

    assert!(!alive);
    assert_eq!(mock.state.borrow().timeout_steps, 0);
}

#[test]
fn timer_hook_zero_fires_soon() {
    let lp = EventLoop::new();
    let (engine, mock) = mock_engine(false, false);
    let _coord = Coordinator::new(&lp, engine);

    mock.timer(0);
    lp.run(RunMode::Default);

    assert_eq!(mock.state.borrow().timeout_steps, 1);
}

#[test]
fn rearming_the_deadline_fires_once_at_the_newest() {
    let lp = EventLoop::new();
    let (engine, mock) = mock_engine(false, false);
    let _coord = Coordinator::new(&lp, engine);

    mock.timer(5_000);
    mock.timer(1);
    lp.run(RunMode::Default);

    assert_eq!(mock.state.borrow().timeout_steps, 1);
}

#[test]
fn completions_drain_in_queue_order() {
    let lp = EventLoop::new();
    let (engine, mock) = mock_engine(true, true);
    let coord = Coordinator::new(&lp, engine);

    let order = Rc::new(RefCell::new(Vec::new()));

    let a = Transfer::new();
    a.set_url("tcp://first");
    {
        let order = order.clone();
        a.on_done(move |status| {
            assert_eq!(status, 0);
            order.borrow_mut().push("a");
        });
    }

    let b = Transfer::new();
    b.set_url("tcp://second");
    {
        let order = order.clone();
        b.on_done(move |status| {
            assert_eq!(status, 0);
            order.borrow_mut().push("b");
        });
    }

    assert_eq!(coord.register(&a), 0);
    assert_eq!(coord.register(&b), 0);
    let tags: Vec<_> = mock.state.borrow().added.iter().map(|(t, _)| *t).collect();

    lp.run(RunMode::Default);

    // Both completed in one engine step; both callbacks fired in
    // queue order, and both transfers were detached.
    assert_eq!(*order.borrow(), vec!["a", "b"]);
    assert_eq!(mock.state.borrow().removed, tags);
    assert!(!a.is_registered());
    assert!(!b.is_registered());
}

#[test]
fn done_callback_can_chain_the_next_transfer() {
    let lp = EventLoop::new();
    let (engine, mock) = mock_engine(true, true);
    let coord = Rc::new(Coordinator::new(&lp, engine));

    let order = Rc::new(RefCell::new(Vec::new()));

    let a = Transfer::new();
    a.set_url("tcp://first");
    {
        let order = order.clone();
        let coord = coord.clone();
        a.on_done(move |status| {
            assert_eq!(status, 0);
            order.borrow_mut().push("a");

            // Register the follow-up from inside the completion
            // callback; it must finish within the same run.
            let b = Transfer::new();
            b.set_url("tcp://second");
            let order = order.clone();
            b.on_done(move |_| order.borrow_mut().push("b"));
            assert_eq!(coord.register(&b), 0);
        });
    }

    assert_eq!(coord.register(&a), 0);
    let alive = lp.run(RunMode::Default);

    assert!(!alive, "loop drained on its own");
    assert_eq!(*order.borrow(), vec!["a", "b"]);
    assert_eq!(mock.state.borrow().timeout_steps, 2);
}

#[test]
fn a_reused_transfer_behaves_like_a_fresh_one() {
    let lp = EventLoop::new();
    let (engine, mock) = mock_engine(true, true);
    let coord = Coordinator::new(&lp, engine);

    let transfer = Transfer::new();
    transfer.set_url("tcp://first");

    let fired = Rc::new(Cell::new(0));

    {
        let fired = fired.clone();
        transfer.on_done(move |_| fired.set(fired.get() + 1));
    }
    assert_eq!(coord.register(&transfer), 0);
    lp.run(RunMode::Default);

    assert_eq!(fired.get(), 1);
    assert!(!transfer.is_registered());

    // Reconfigure and go again.
    transfer.set_url("tcp://second");
    {
        let fired = fired.clone();
        transfer.on_done(move |_| fired.set(fired.get() + 1));
    }
    assert_eq!(coord.register(&transfer), 0);
    lp.run(RunMode::Default);

    assert_eq!(fired.get(), 2);
    assert_eq!(mock.state.borrow().added.len(), 2);
    let urls: Vec<_> = mock
        .state
        .borrow()
        .added
        .iter()
        .map(|(_, c)| c.url.clone().unwrap())
        .collect();
    assert_eq!(urls, vec!["tcp://first", "tcp://second"]);
}

#[test]
#[should_panic(expected = "already registered")]
fn registering_an_inflight_transfer_panics() {
    let lp = EventLoop::new();
    let (engine, _mock) = mock_engine(false, false);
    let coord = Coordinator::new(&lp, engine);

    let transfer = Transfer::new();
    coord.register(&transfer);
    coord.register(&transfer);
}

#[test]
fn rejected_registration_rolls_back() {
    let lp = EventLoop::new();
    let (engine, mock) = mock_engine(true, true);
    let coord = Coordinator::new(&lp, engine);

    let transfer = Transfer::new();
    transfer.set_url("fail://nope");
    transfer.on_done(|_| panic!("rejected transfer must not complete"));

    assert_eq!(coord.register(&transfer), -5);
    assert!(!transfer.is_registered());
    assert_eq!(mock.state.borrow().added.len(), 0);

    assert!(!lp.run(RunMode::Default));
}

#[test]
fn non_done_completion_messages_are_ignored() {
    let lp = EventLoop::new();
    let (engine, mock) = mock_engine(true, false);
    let coord = Coordinator::new(&lp, engine);

    let transfer = Transfer::new();
    let fired = Rc::new(Cell::new(false));
    {
        let fired = fired.clone();
        transfer.on_done(move |_| fired.set(true));
    }
    assert_eq!(coord.register(&transfer), 0);
    let tag = mock.last_tag();

    // An unknown message kind ahead of the real completion is logged
    // and skipped; the done entry behind it still lands.
    mock.push_completion(tag, CompletionResult::Other(7));
    mock.push_completion(tag, CompletionResult::Done { status: 0 });

    lp.run(RunMode::Default);

    assert!(fired.get());
    assert_eq!(mock.state.borrow().removed, vec![tag]);
}

#[test]
#[should_panic(expected = "unknown transfer")]
fn completion_for_unknown_tag_panics() {
    let lp = EventLoop::new();
    let (engine, mock) = mock_engine(false, false);
    let _coord = Coordinator::new(&lp, engine);

    mock.push_completion(999, CompletionResult::Done { status: 0 });
    mock.timer(1);
    lp.run(RunMode::Default);
}
