use quickcheck::{Arbitrary, Gen};
use quickcheck_macros::quickcheck;
use std::{ptr, sync::Mutex};

use super::*;
use crate::{
    error::{StartTimerError, StopTimerError},
    test_port::{advance, fire, MockPort, RegWrite},
    Mailbox, PortDeadline, PortToTimer,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn setup<P: MockPort>() {
    init_logger();
    unsafe { P::init() };
    P::mock().take_writes();
}

/// List the deltas of the timer list, naming each entry by its position in
/// `entries` (`'A'`, `'B'`, ...).
fn deltas<P: Port>(entries: &[&'static TimerEntry<P>]) -> Vec<(char, Ticks)> {
    let lock = lock_gate::<P>().unwrap();
    list::iter(&*lock)
        .map(|e| {
            let i = entries
                .iter()
                .position(|x| ptr::eq(*x, e))
                .expect("unknown entry in the list");
            ((b'A' + i as u8) as char, e.remaining.get(&*lock))
        })
        .collect()
}

#[test]
fn insert_then_stop_the_head() {
    test_port!(struct P);
    static A: TimerEntry<P> = TimerEntry::new(Notify::None);
    static B: TimerEntry<P> = TimerEntry::new(Notify::None);
    setup::<P>();

    A.start(10, 0).unwrap();
    B.start(5, 0).unwrap();
    assert_eq!(deltas(&[&A, &B]), [('B', 5), ('A', 5)]);
    assert_eq!(
        P::mock().take_writes(),
        [RegWrite::Set(10), RegWrite::Set(5)]
    );

    B.stop().unwrap();
    assert_eq!(deltas(&[&A, &B]), [('A', 10)]);
    assert!(!B.is_scheduled());
    // The register still holds B's deadline
    assert_eq!(P::mock().take_writes(), []);

    // ... which fires without expiring anything
    advance::<P>(5);
    assert!(A.is_scheduled());
    assert_eq!(A.remaining(), Ok(5));
    assert_eq!(P::mock().take_writes(), [RegWrite::Set(5)]);

    advance::<P>(5);
    assert!(!A.is_scheduled());
    assert!(deltas(&[&A, &B]).is_empty());
    assert_eq!(P::mock().take_writes(), [RegWrite::Disarm]);
}

#[test]
fn stop_unscheduled_is_silent() {
    test_port!(struct P);
    static A: TimerEntry<P> = TimerEntry::new(Notify::None);
    setup::<P>();

    let disables = P::mock().disable_count();
    assert_eq!(A.stop(), Err(StopTimerError::NotScheduled));
    assert_eq!(P::mock().disable_count(), disables);
    assert_eq!(P::mock().take_writes(), []);

    A.start(3, 0).unwrap();
    A.stop().unwrap();
    P::mock().take_writes();

    let disables = P::mock().disable_count();
    assert_eq!(A.stop(), Err(StopTimerError::NotScheduled));
    assert_eq!(P::mock().disable_count(), disables);
    assert_eq!(P::mock().take_writes(), []);
}

#[test]
fn stop_sole_entry_disarms() {
    test_port!(struct P);
    static A: TimerEntry<P> = TimerEntry::new(Notify::None);
    setup::<P>();

    A.start(100, 0).unwrap();
    P::mock().take_writes();

    A.stop().unwrap();
    assert_eq!(P::mock().take_writes(), [RegWrite::Disarm]);
    assert_eq!(deltas(&[&A]), []);
}

#[test]
fn stop_folds_delta_into_successor() {
    test_port!(struct P);
    static A: TimerEntry<P> = TimerEntry::new(Notify::None);
    static B: TimerEntry<P> = TimerEntry::new(Notify::None);
    static C: TimerEntry<P> = TimerEntry::new(Notify::None);
    setup::<P>();

    A.start(5, 0).unwrap();
    B.start(10, 0).unwrap();
    C.start(20, 0).unwrap();
    assert_eq!(deltas(&[&A, &B, &C]), [('A', 5), ('B', 5), ('C', 10)]);
    P::mock().take_writes();

    B.stop().unwrap();
    assert_eq!(deltas(&[&A, &B, &C]), [('A', 5), ('C', 15)]);
    assert_eq!(P::mock().take_writes(), []);

    // Stopping the tail leaves the rest alone
    C.stop().unwrap();
    assert_eq!(deltas(&[&A, &B, &C]), [('A', 5)]);
    assert_eq!(C.remaining(), Err(GetRemainingError::NotScheduled));
    assert_eq!(A.remaining(), Ok(5));
}

#[test]
fn start_stop_many_times() {
    test_port!(struct P);
    static A: TimerEntry<P> = TimerEntry::new(Notify::None);
    static B: TimerEntry<P> = TimerEntry::new(Notify::None);
    setup::<P>();

    B.start(1000, 0).unwrap();

    for i in 0..1000 {
        A.start(i % 50 + 1, 0).unwrap();
        assert!(A.is_scheduled());
        A.stop().unwrap();
        assert!(!A.is_scheduled());
        assert_eq!(A.stop(), Err(StopTimerError::NotScheduled));
    }

    assert_eq!(deltas(&[&A, &B]), [('B', 1000)]);
    assert_eq!(B.remaining(), Ok(1000));
}

#[test]
fn equal_deadlines_fire_in_insertion_order() {
    test_port!(struct P);
    static LOG: Mutex<Vec<usize>> = Mutex::new(Vec::new());
    fn record(param: usize) {
        LOG.lock().unwrap().push(param);
    }
    static A: TimerEntry<P> = TimerEntry::new(Notify::Callback {
        func: record,
        param: 0,
    });
    static B: TimerEntry<P> = TimerEntry::new(Notify::Callback {
        func: record,
        param: 1,
    });
    static C: TimerEntry<P> = TimerEntry::new(Notify::Callback {
        func: record,
        param: 2,
    });
    setup::<P>();

    A.start(10, 0).unwrap();
    B.start(10, 0).unwrap();
    advance::<P>(3);
    C.start(7, 0).unwrap();
    assert_eq!(deltas(&[&A, &B, &C]), [('A', 10), ('B', 0), ('C', 0)]);

    advance::<P>(7);
    assert_eq!(*LOG.lock().unwrap(), [0, 1, 2]);
}

#[test]
fn start_rejects_bad_requests() {
    test_port!(struct P);
    static A: TimerEntry<P> = TimerEntry::new(Notify::None);
    setup::<P>();

    assert_eq!(A.start(MAX_DELAY + 1, 0), Err(StartTimerError::BadParam));
    assert_eq!(A.start(1, MAX_DELAY + 1), Err(StartTimerError::BadParam));
    assert_eq!(
        A.set_interval(MAX_DELAY + 1),
        Err(SetTimerIntervalError::BadParam)
    );
    assert!(!A.is_scheduled());

    A.start(20, 0).unwrap();
    advance::<P>(5);
    assert_eq!(A.start(1, 0), Err(StartTimerError::AlreadyScheduled));
    assert_eq!(deltas(&[&A]), [('A', 20)]);
    assert_eq!(A.remaining(), Ok(15));
}

#[test]
fn zero_delay_with_interval_waits_one_interval() {
    test_port!(struct P);
    static LOG: Mutex<Vec<Ticks>> = Mutex::new(Vec::new());
    fn record(_: usize) {
        LOG.lock().unwrap().push(P::tick_count());
    }
    static A: TimerEntry<P> = TimerEntry::new(Notify::Callback {
        func: record,
        param: 0,
    });
    setup::<P>();

    A.start(0, 4).unwrap();
    advance::<P>(13);
    assert_eq!(*LOG.lock().unwrap(), [4, 8, 12]);

    // The expiry at 16 stays; the new interval applies after it
    A.set_interval(10).unwrap();
    assert_eq!(A.remaining(), Ok(3));
    advance::<P>(3);
    assert_eq!(*LOG.lock().unwrap(), [4, 8, 12, 16]);
    assert_eq!(A.remaining(), Ok(10));
    A.stop().unwrap();
}

#[test]
fn zero_delay_one_shot_fires_at_once() {
    test_port!(struct P);
    static A: TimerEntry<P> = TimerEntry::new(Notify::None);
    setup::<P>();

    A.start(0, 0).unwrap();
    assert_eq!(P::mock().take_writes(), [RegWrite::Pend]);
    advance::<P>(0);
    assert!(!A.is_scheduled());
}

#[test]
fn late_handler_expires_everything_due() {
    test_port!(struct P);
    static LOG: Mutex<Vec<usize>> = Mutex::new(Vec::new());
    fn record(param: usize) {
        LOG.lock().unwrap().push(param);
    }
    static A: TimerEntry<P> = TimerEntry::new(Notify::Callback {
        func: record,
        param: 0,
    });
    static B: TimerEntry<P> = TimerEntry::new(Notify::Callback {
        func: record,
        param: 1,
    });
    static C: TimerEntry<P> = TimerEntry::new(Notify::Callback {
        func: record,
        param: 2,
    });
    setup::<P>();

    C.start(30, 0).unwrap();
    B.start(10, 0).unwrap();
    A.start(5, 0).unwrap();

    P::mock().skip(20);
    fire::<P>();

    assert_eq!(*LOG.lock().unwrap(), [0, 1]);
    assert_eq!(deltas(&[&A, &B, &C]), [('C', 10)]);
    assert_eq!(C.remaining(), Ok(10));
    assert_eq!(P::mock().take_writes().last(), Some(&RegWrite::Set(10)));

    advance::<P>(10);
    assert_eq!(*LOG.lock().unwrap(), [0, 1, 2]);
}

#[test]
fn late_repeating_timer_keeps_its_period() {
    test_port!(struct P);
    static A: TimerEntry<P> = TimerEntry::new(Notify::None);
    setup::<P>();

    A.start(10, 10).unwrap();
    P::mock().skip(13);
    fire::<P>();

    // Rearmed one interval after the handler ran
    assert_eq!(A.remaining(), Ok(10));
    A.stop().unwrap();
}

#[test]
fn stop_racing_the_interrupt() {
    test_port!(struct P);
    static FIRED: Mutex<usize> = Mutex::new(0);
    fn record(_: usize) {
        *FIRED.lock().unwrap() += 1;
    }
    static A: TimerEntry<P> = TimerEntry::new(Notify::Callback {
        func: record,
        param: 0,
    });
    setup::<P>();

    // The interrupt is taken between the unmasked check and closing the gate
    A.start(10, 0).unwrap();
    advance::<P>(9);
    P::mock().before_next_disable(|| advance::<P>(1));
    assert_eq!(A.stop(), Err(StopTimerError::NotScheduled));
    assert_eq!(*FIRED.lock().unwrap(), 1);

    // The stop wins: the timer never fires
    A.start(10, 0).unwrap();
    advance::<P>(9);
    A.stop().unwrap();
    advance::<P>(100);
    assert_eq!(*FIRED.lock().unwrap(), 1);
}

#[test]
fn nested_gates() {
    test_port!(struct P);
    static A: TimerEntry<P> = TimerEntry::new(Notify::None);
    setup::<P>();

    assert!(!Gate::<P>::is_closed());
    let outer = Gate::<P>::close();
    {
        let _inner = Gate::<P>::close();
        A.start(5, 0).unwrap();
    }
    // Neither the inner gate nor the timer call opened the gate
    assert!(Gate::<P>::is_closed());
    A.stop().unwrap();
    assert!(Gate::<P>::is_closed());
    drop(outer);
    assert!(!Gate::<P>::is_closed());
}

#[test]
fn reentry_is_bad_context() {
    test_port!(struct P);
    static A: TimerEntry<P> = TimerEntry::new(Notify::None);
    setup::<P>();

    A.start(5, 0).unwrap();

    let lock = lock_gate::<P>().unwrap();
    assert_eq!(A.stop(), Err(StopTimerError::BadContext));
    assert_eq!(A.start(5, 0), Err(StartTimerError::BadContext));
    assert_eq!(A.remaining(), Err(GetRemainingError::BadContext));
    assert!(lock_gate::<P>().is_err());
    // The failed attempts restored the gate to the outer state
    assert!(Gate::<P>::is_closed());
    drop(lock);
    assert!(!Gate::<P>::is_closed());

    A.stop().unwrap();
}

#[test]
fn notification_restarts_timers() {
    test_port!(struct P);
    static LOG: Mutex<Vec<(Ticks, usize)>> = Mutex::new(Vec::new());
    fn on_a(param: usize) {
        LOG.lock().unwrap().push((P::tick_count(), param));
        B.start(3, 0).unwrap();
        assert_eq!(A.stop(), Err(StopTimerError::NotScheduled));
    }
    fn on_b(param: usize) {
        LOG.lock().unwrap().push((P::tick_count(), param));
    }
    static A: TimerEntry<P> = TimerEntry::new(Notify::Callback {
        func: on_a,
        param: 0,
    });
    static B: TimerEntry<P> = TimerEntry::new(Notify::Callback {
        func: on_b,
        param: 1,
    });
    setup::<P>();

    A.start(5, 0).unwrap();
    P::mock().take_writes();

    advance::<P>(5);
    // Only the handler touched the register, once
    assert_eq!(P::mock().take_writes(), [RegWrite::Set(3)]);

    advance::<P>(3);
    assert_eq!(*LOG.lock().unwrap(), [(5, 0), (8, 1)]);
}

#[test]
fn message_to_full_mailbox_is_dropped() {
    test_port!(struct P);
    static MAILBOX: Mailbox<P> = Mailbox::new();
    static A: TimerEntry<P> = TimerEntry::new(Notify::Message {
        mailbox: &MAILBOX,
        message: 42,
    });
    setup::<P>();

    A.start(2, 2).unwrap();
    advance::<P>(2);
    assert!(MAILBOX.is_full());
    advance::<P>(4);
    assert_eq!(MAILBOX.try_recv(), Ok(42));
    assert!(MAILBOX.try_recv().is_err());

    advance::<P>(2);
    assert_eq!(MAILBOX.try_recv(), Ok(42));
    A.stop().unwrap();
}

#[test]
fn restart_from_notification_waits_for_the_next_interrupt() {
    use std::sync::atomic::{AtomicUsize, Ordering::Relaxed};

    test_port!(struct P);
    static COUNT: AtomicUsize = AtomicUsize::new(0);
    fn again(_: usize) {
        COUNT.fetch_add(1, Relaxed);
        A.start(0, 0).unwrap();
    }
    static A: TimerEntry<P> = TimerEntry::new(Notify::Callback {
        func: again,
        param: 0,
    });
    setup::<P>();

    A.start(0, 0).unwrap();
    assert_eq!(P::mock().take_writes(), [RegWrite::Pend]);

    fire::<P>();
    assert_eq!(COUNT.load(Relaxed), 1);
    assert!(A.is_scheduled());
    // Due at once, so the handler pends another interrupt
    assert_eq!(P::mock().take_writes(), [RegWrite::Pend]);

    fire::<P>();
    assert_eq!(COUNT.load(Relaxed), 2);
    assert_eq!(P::mock().take_writes(), [RegWrite::Pend]);
}

#[test]
fn repeating_timers_run_a_thousand_periods() {
    use std::sync::atomic::{AtomicUsize, Ordering::Relaxed};

    test_port!(struct P);
    static COUNTS: [AtomicUsize; 2] = [AtomicUsize::new(0), AtomicUsize::new(0)];
    fn count(param: usize) {
        COUNTS[param].fetch_add(1, Relaxed);
    }
    static A: TimerEntry<P> = TimerEntry::new(Notify::Callback {
        func: count,
        param: 0,
    });
    static B: TimerEntry<P> = TimerEntry::new(Notify::Callback {
        func: count,
        param: 1,
    });
    setup::<P>();

    A.start(3, 3).unwrap();
    B.start(7, 7).unwrap();
    advance::<P>(3000);

    assert_eq!(COUNTS[0].load(Relaxed), 1000);
    assert_eq!(COUNTS[1].load(Relaxed), 3000 / 7);
    assert_eq!(A.remaining(), Ok(3));
    assert_eq!(B.remaining(), Ok(3));

    // Still exactly two entries; A joined B's deadline behind it
    assert_eq!(deltas(&[&A, &B]), [('B', 3), ('A', 0)]);
    assert_eq!(P::mock().take_writes().last(), Some(&RegWrite::Set(3)));

    A.stop().unwrap();
    B.stop().unwrap();
    assert!(deltas(&[&A, &B]).is_empty());
}

#[test]
fn debug_lists_deltas() {
    test_port!(struct P);
    static A: TimerEntry<P> = TimerEntry::new(Notify::None);
    setup::<P>();

    A.start(9, 0).unwrap();
    let s = format!("{:?}", P::timer_globals());
    assert!(s.contains("last_sync"), "{s}");
    assert!(s.contains(", 9)"), "{s}");
    A.stop().unwrap();
}

const NUM_TIMERS: usize = 4;

#[derive(Debug, Clone)]
enum Op {
    Start {
        timer: usize,
        delay: Ticks,
        interval: Ticks,
    },
    Stop {
        timer: usize,
    },
    Advance(Ticks),
}

impl Arbitrary for Op {
    fn arbitrary(g: &mut Gen) -> Self {
        let timer = usize::arbitrary(g) % NUM_TIMERS;
        match u8::arbitrary(g) % 3 {
            0 => Op::Start {
                timer,
                delay: u32::arbitrary(g) % 40 + 1,
                interval: if bool::arbitrary(g) {
                    0
                } else {
                    u32::arbitrary(g) % 40 + 1
                },
            },
            1 => Op::Stop { timer },
            _ => Op::Advance(u32::arbitrary(g) % 60),
        }
    }
}

/// Run random programs against a model that tracks absolute deadlines, and
/// check that no timer drifts.
#[quickcheck]
fn matches_absolute_deadlines(ops: Vec<Op>) {
    test_port!(struct P);
    static LOG: Mutex<Vec<(Ticks, usize)>> = Mutex::new(Vec::new());
    fn record(param: usize) {
        LOG.lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((P::tick_count(), param));
    }
    static TIMERS: [TimerEntry<P>; NUM_TIMERS] = [
        TimerEntry::new(Notify::Callback {
            func: record,
            param: 0,
        }),
        TimerEntry::new(Notify::Callback {
            func: record,
            param: 1,
        }),
        TimerEntry::new(Notify::Callback {
            func: record,
            param: 2,
        }),
        TimerEntry::new(Notify::Callback {
            func: record,
            param: 3,
        }),
    ];

    for timer in TIMERS.iter() {
        let _ = timer.stop();
    }
    LOG.lock().unwrap_or_else(|e| e.into_inner()).clear();
    setup::<P>();

    // (absolute deadline, interval)
    let mut model: [Option<(Ticks, Ticks)>; NUM_TIMERS] = [None; NUM_TIMERS];
    let mut expected = Vec::new();

    for op in ops {
        log::trace!("{op:?}");
        let now = P::tick_count();
        match op {
            Op::Start {
                timer,
                delay,
                interval,
            } => {
                let result = TIMERS[timer].start(delay, interval);
                if model[timer].is_some() {
                    assert_eq!(result, Err(StartTimerError::AlreadyScheduled));
                } else {
                    assert_eq!(result, Ok(()));
                    model[timer] = Some((now + delay, interval));
                }
            }
            Op::Stop { timer } => {
                let result = TIMERS[timer].stop();
                if model[timer].take().is_some() {
                    assert_eq!(result, Ok(()));
                } else {
                    assert_eq!(result, Err(StopTimerError::NotScheduled));
                }
            }
            Op::Advance(ticks) => {
                let target = now + ticks;
                while let Some(at) = model
                    .iter()
                    .flatten()
                    .map(|&(deadline, _)| deadline)
                    .filter(|&deadline| deadline <= target)
                    .min()
                {
                    for (i, m) in model.iter_mut().enumerate() {
                        if let Some((deadline, interval)) = *m {
                            if deadline == at {
                                expected.push((at, i));
                                *m = (interval != 0).then_some((deadline + interval, interval));
                            }
                        }
                    }
                }
                advance::<P>(ticks);
            }
        }

        let now = P::tick_count();
        for (timer, m) in TIMERS.iter().zip(model.iter()) {
            match *m {
                Some((deadline, _)) => assert_eq!(timer.remaining(), Ok(deadline - now)),
                None => assert!(!timer.is_scheduled()),
            }
        }
    }

    let mut actual = std::mem::take(&mut *LOG.lock().unwrap());
    actual.sort_unstable();
    expected.sort_unstable();
    assert_eq!(actual, expected);

    for timer in TIMERS.iter() {
        let _ = timer.stop();
    }
}
