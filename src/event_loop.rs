use crossbeam_channel::{Receiver, Sender, select, unbounded};
use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use crate::core::eval::{Evaluator, Signal};
use crate::core::value::Value;
use crate::coroutine::Scheduler;
use crate::error::JSError;

#[derive(Debug)]
pub enum TimerCommand {
    Schedule { id: usize, when: Instant },
    Cancel(usize),
}

/// Spawn the timer thread and return (cmd_sender, expired_receiver).
pub fn spawn_timer_thread() -> (Sender<TimerCommand>, Receiver<usize>) {
    let (cmd_tx, cmd_rx) = unbounded::<TimerCommand>();
    let (expired_tx, expired_rx) = unbounded::<usize>();

    thread::Builder::new()
        .name("js-timer-thread".to_string())
        .spawn(move || {
            // min-heap of (Instant, id)
            let mut heap: BinaryHeap<Reverse<(Instant, usize)>> = BinaryHeap::new();
            // canceled ids
            let mut canceled: HashSet<usize> = HashSet::new();

            loop {
                // determine next timeout
                let timeout = if let Some(Reverse((when, _id))) = heap.peek().cloned() {
                    let now = Instant::now();
                    if when <= now {
                        // immediate; don't wait
                        Some(Duration::from_millis(0))
                    } else {
                        Some(when - now)
                    }
                } else {
                    None
                };

                // wait for either a command or timeout
                if let Some(t) = timeout {
                    if t.is_zero() {
                        // pop all expired items
                        let now = Instant::now();
                        while let Some(Reverse((when, id))) = heap.peek().cloned() {
                            if when <= now {
                                heap.pop();
                                if !canceled.remove(&id) {
                                    // notify main thread of expiry
                                    if let Err(e) = expired_tx.send(id) {
                                        log::warn!("Failed to send expired timer id: {e:?}");
                                    }
                                }
                            } else {
                                break;
                            }
                        }
                        // loop back to recompute timeout
                        continue;
                    }

                    select! {
                        recv(cmd_rx) -> msg => match msg {
                            Ok(TimerCommand::Schedule { id, when }) => {
                                heap.push(Reverse((when, id)));
                            }
                            Ok(TimerCommand::Cancel(id)) => {
                                canceled.insert(id);
                            }
                            Err(_) => {
                                break; // channel closed
                            }
                        },
                        default(t) => {
                            // timed wait: busy-wait using sleep for small t
                            // but if t is large, we can block on recv with timeout by using recv_timeout
                            // we emulate by trying recv with timeout
                            match cmd_rx.recv_timeout(t) {
                                Ok(TimerCommand::Schedule { id, when }) => heap.push(Reverse((when, id))),
                                Ok(TimerCommand::Cancel(id)) => { canceled.insert(id); }
                                Err(_) => { /* timeout or disconnected */ }
                            }
                        }
                    }
                } else {
                    // no timers scheduled: block until a command arrives
                    match cmd_rx.recv() {
                        Ok(TimerCommand::Schedule { id, when }) => heap.push(Reverse((when, id))),
                        Ok(TimerCommand::Cancel(id)) => {
                            canceled.insert(id);
                        }
                        Err(_) => {
                            break;
                        }
                    }
                }
            }
        })
        .expect("failed to spawn timer thread");

    (cmd_tx, expired_rx)
}

/// A registered external I/O source the host embeds into the loop — a
/// socket, a file descriptor, anything that can report readiness without
/// blocking. `Non-goals` excludes a built-in fs/network module, but the
/// loop's driver still needs a seam for an embedder to plug one in.
pub trait IoPoller {
    /// Non-blocking readiness check. Returning values are delivered to
    /// `on_ready` as a single JS value each (shape is the poller's choice).
    fn poll(&mut self, ev: &mut Evaluator) -> Vec<(Value, Value)>;
}

/// The top-level driver: microtasks -> ready coroutines -> expired timers
/// -> registered I/O pollers -> repeat until nothing is left pending.
/// Single-threaded and cooperative throughout (§5); only the timer thread
/// itself runs off the main thread, and only to compute deadlines.
pub struct EventLoop {
    timer_cmd: Sender<TimerCommand>,
    timer_expired: Receiver<usize>,
    timer_callbacks: HashMap<usize, Value>,
    next_timer_id: usize,
    pollers: Vec<Box<dyn IoPoller>>,
    pub coroutines: Scheduler,
}

impl EventLoop {
    /// `coroutine_roots` is the same cell as `Evaluator::coroutine_roots` —
    /// sharing it lets the scheduler report parked fibers' live values to
    /// the evaluator's GC without the loop and the evaluator knowing about
    /// each other's internals.
    pub fn new(coroutine_roots: Rc<RefCell<Vec<Value>>>) -> EventLoop {
        let (timer_cmd, timer_expired) = spawn_timer_thread();
        EventLoop {
            timer_cmd,
            timer_expired,
            timer_callbacks: HashMap::new(),
            next_timer_id: 1,
            pollers: Vec::new(),
            coroutines: Scheduler::new(coroutine_roots),
        }
    }

    pub fn register_poller(&mut self, poller: Box<dyn IoPoller>) {
        self.pollers.push(poller);
    }

    /// `setTimeout`/`setInterval`'s underlying primitive: schedule
    /// `callback` to run after `delay`, returning the id `clearTimeout`
    /// cancels with.
    pub fn set_timeout(&mut self, callback: Value, delay: Duration) -> usize {
        let id = self.next_timer_id;
        self.next_timer_id += 1;
        self.timer_callbacks.insert(id, callback);
        let _ = self.timer_cmd.send(TimerCommand::Schedule { id, when: Instant::now() + delay });
        id
    }

    pub fn clear_timeout(&mut self, id: usize) {
        self.timer_callbacks.remove(&id);
        let _ = self.timer_cmd.send(TimerCommand::Cancel(id));
    }

    fn has_pending_work(&self) -> bool {
        !self.timer_callbacks.is_empty() || !self.coroutines.is_empty()
    }

    /// Run one full tick: drain microtasks, drive ready coroutines (which
    /// may themselves enqueue microtasks — drained again before this
    /// returns), fire any timers that have already expired, then poll I/O
    /// sources once. Blocks on the timer channel only when nothing else is
    /// ready and a timer is outstanding.
    pub fn tick(&mut self, ev: &mut Evaluator) -> Result<(), JSError> {
        crate::js_promise::run_microtasks(ev)?;
        self.coroutines.run_ready(ev)?;
        crate::js_promise::run_microtasks(ev)?;

        let blocking = !self.has_pending_work_other_than_timers();
        loop {
            let expired = if blocking && self.has_pending_work() {
                self.timer_expired.recv().ok()
            } else {
                self.timer_expired.try_recv().ok()
            };
            let Some(id) = expired else { break };
            if let Some(callback) = self.timer_callbacks.remove(&id) {
                match ev.call(callback, Value::UNDEFINED, &[]) {
                    Ok(_) => {}
                    Err(Signal::Thrown(v)) => return Err(ev.thrown_to_error(v)),
                    Err(Signal::Js(e)) => return Err(e),
                    Err(_) => {}
                }
            }
            crate::js_promise::run_microtasks(ev)?;
            self.coroutines.run_ready(ev)?;
            break;
        }

        for i in 0..self.pollers.len() {
            let mut poller = std::mem::replace(&mut self.pollers[i], Box::new(NullPoller));
            let events = poller.poll(ev);
            self.pollers[i] = poller;
            for (callback, arg) in events {
                match ev.call(callback, Value::UNDEFINED, &[arg]) {
                    Ok(_) => {}
                    Err(Signal::Thrown(v)) => return Err(ev.thrown_to_error(v)),
                    Err(Signal::Js(e)) => return Err(e),
                    Err(_) => {}
                }
            }
        }
        crate::js_promise::run_microtasks(ev)?;
        Ok(())
    }

    fn has_pending_work_other_than_timers(&self) -> bool {
        !self.coroutines.is_empty() || !self.pollers.is_empty()
    }

    /// Run ticks until no timers, coroutines, or I/O sources remain
    /// pending — the embedder's `js_run_loop` entry point.
    pub fn run_to_completion(&mut self, ev: &mut Evaluator) -> Result<(), JSError> {
        loop {
            self.tick(ev)?;
            if !self.has_pending_work() {
                break;
            }
        }
        Ok(())
    }
}

struct NullPoller;
impl IoPoller for NullPoller {
    fn poll(&mut self, _ev: &mut Evaluator) -> Vec<(Value, Value)> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::heap::Heap;
    use std::rc::Rc;

    #[test]
    fn set_timeout_fires_its_callback_on_the_next_tick() {
        let mut ev = Evaluator::new(Heap::new(64 * 1024, 16 * 1024 * 1024).unwrap(), "<test>");
        let ran = std::rc::Rc::new(std::cell::Cell::new(false));
        let ran2 = ran.clone();
        let idx = ev.register_native(Rc::new(move |_ev, _this, _args| {
            ran2.set(true);
            Ok(Value::UNDEFINED)
        }));
        let callback = Value::make(crate::core::value::Tag::NativeFunction, idx as u64);
        let mut loop_ = EventLoop::new(ev.coroutine_roots.clone());
        loop_.set_timeout(callback, Duration::from_millis(0));
        loop_.run_to_completion(&mut ev).unwrap();
        assert!(ran.get());
    }
}
