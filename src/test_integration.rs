//! End-to-end bus behavior: delivery, matching modes, error routing, and
//! the async dispatcher under concurrency.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::{
    BusConfig, DeadMessage, HandlerError, HandlerResult, HandlerSet, Listener, Message,
    MessageBus, PublicationError, PublicationErrorHandler, PublishMode, SupertypeSet,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn bus_with(mode: PublishMode, workers: usize) -> MessageBus {
    init_tracing();
    MessageBus::new(BusConfig {
        publish_mode: mode,
        worker_threads: workers,
    })
}

struct ErrorCollector {
    errors: Arc<Mutex<Vec<String>>>,
}

impl PublicationErrorHandler for ErrorCollector {
    fn handle_error(&self, error: &PublicationError) {
        self.errors.lock().push(error.to_string());
    }
}

#[derive(Debug)]
struct NumberLike {
    value: i64,
}
impl Message for NumberLike {}

#[derive(Debug)]
struct IntegerLike {
    number: NumberLike,
}
impl Message for IntegerLike {
    fn parents(set: &mut SupertypeSet<Self>) {
        set.add(|i: &IntegerLike| &i.number);
    }
}

struct IntListener {
    seen: Mutex<Vec<i32>>,
}

impl IntListener {
    fn on_int(&self, n: &i32) -> HandlerResult {
        self.seen.lock().push(*n);
        Ok(())
    }
}

impl Listener for IntListener {
    fn handlers(set: &mut HandlerSet<Self>) {
        set.on(IntListener::on_int).named("on_int");
    }
}

#[test]
fn exact_delivery_of_a_single_message() {
    let bus = bus_with(PublishMode::Exact, 2);
    let listener = Arc::new(IntListener {
        seen: Mutex::new(Vec::new()),
    });
    bus.subscribe(&listener);
    bus.publish(42_i32);

    assert_eq!(*listener.seen.lock(), vec![42]);
}

#[test]
fn super_type_handler_receives_the_subtype() {
    struct NumberListener {
        values: Mutex<Vec<i64>>,
    }

    impl NumberListener {
        fn on_number(&self, n: &NumberLike) -> HandlerResult {
            self.values.lock().push(n.value);
            Ok(())
        }
    }

    impl Listener for NumberListener {
        fn handlers(set: &mut HandlerSet<Self>) {
            set.on(NumberListener::on_number);
        }
    }

    let bus = bus_with(PublishMode::ExactWithSuperTypes, 2);
    let listener = Arc::new(NumberListener {
        values: Mutex::new(Vec::new()),
    });
    bus.subscribe(&listener);
    bus.publish(IntegerLike {
        number: NumberLike { value: 42 },
    });

    assert_eq!(*listener.values.lock(), vec![42]);
}

#[test]
fn super_type_matching_is_off_in_exact_mode() {
    struct NumberOnly {
        hits: AtomicUsize,
    }

    impl NumberOnly {
        fn on_number(&self, _n: &NumberLike) -> HandlerResult {
            self.hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl Listener for NumberOnly {
        fn handlers(set: &mut HandlerSet<Self>) {
            set.on(NumberOnly::on_number);
        }
    }

    let bus = bus_with(PublishMode::Exact, 2);
    let listener = Arc::new(NumberOnly {
        hits: AtomicUsize::new(0),
    });
    bus.subscribe(&listener);
    bus.publish(IntegerLike {
        number: NumberLike { value: 1 },
    });

    assert_eq!(listener.hits.load(Ordering::SeqCst), 0);
}

#[test]
fn opting_out_of_subtypes_skips_super_delivery() {
    struct StrictNumber {
        hits: AtomicUsize,
    }

    impl StrictNumber {
        fn on_number(&self, _n: &NumberLike) -> HandlerResult {
            self.hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl Listener for StrictNumber {
        fn handlers(set: &mut HandlerSet<Self>) {
            set.on(StrictNumber::on_number).accept_subtypes(false);
        }
    }

    let bus = bus_with(PublishMode::ExactWithSuperTypes, 2);
    let listener = Arc::new(StrictNumber {
        hits: AtomicUsize::new(0),
    });
    bus.subscribe(&listener);

    bus.publish(IntegerLike {
        number: NumberLike { value: 3 },
    });
    assert_eq!(listener.hits.load(Ordering::SeqCst), 0);

    bus.publish(NumberLike { value: 3 });
    assert_eq!(listener.hits.load(Ordering::SeqCst), 1);
}

#[test]
fn variadic_handler_collects_homogeneous_tuples() {
    struct BatchListener {
        batches: Mutex<Vec<Vec<i32>>>,
    }

    impl BatchListener {
        fn on_many(&self, items: &[&i32]) -> HandlerResult {
            self.batches
                .lock()
                .push(items.iter().map(|n| **n).collect());
            Ok(())
        }
    }

    impl Listener for BatchListener {
        fn handlers(set: &mut HandlerSet<Self>) {
            set.on_varargs(BatchListener::on_many);
        }
    }

    let bus = bus_with(PublishMode::ExactWithSuperTypesAndVarArgs, 2);
    let listener = Arc::new(BatchListener {
        batches: Mutex::new(Vec::new()),
    });
    bus.subscribe(&listener);

    bus.publish3(1_i32, 2_i32, 3_i32);
    bus.publish_many(vec![7_i32, 8_i32]);

    let batches = listener.batches.lock();
    assert_eq!(*batches, vec![vec![1, 2, 3], vec![7, 8]]);
}

#[test]
fn unmatched_publication_is_wrapped_exactly_once() {
    struct DeadListener {
        wrapped: Mutex<Vec<usize>>,
    }

    impl DeadListener {
        fn on_dead(&self, dead: &DeadMessage) -> HandlerResult {
            self.wrapped.lock().push(dead.messages().len());
            Ok(())
        }
    }

    impl Listener for DeadListener {
        fn handlers(set: &mut HandlerSet<Self>) {
            set.on(DeadListener::on_dead);
        }
    }

    let bus = bus_with(PublishMode::ExactWithSuperTypes, 2);
    let listener = Arc::new(DeadListener {
        wrapped: Mutex::new(Vec::new()),
    });
    bus.subscribe(&listener);

    bus.publish("x");
    assert_eq!(*listener.wrapped.lock(), vec![1]);
    assert_eq!(bus.stats().dead_messages, 1);

    // a matched publication does not touch the dead-message listener
    bus.publish(DeadMessage::new(&[]));
    assert_eq!(listener.wrapped.lock().len(), 2); // direct publish matched it exactly
    assert_eq!(bus.stats().dead_messages, 1);
}

#[test]
fn handler_failure_reaches_the_sink_and_publish_returns() {
    struct Thrower;

    impl Thrower {
        fn on_int(&self, n: &i32) -> HandlerResult {
            Err(HandlerError::failed(format!("cannot process {n}")))
        }
    }

    impl Listener for Thrower {
        fn handlers(set: &mut HandlerSet<Self>) {
            set.on(Thrower::on_int);
        }
    }

    let bus = bus_with(PublishMode::Exact, 2);
    let errors = Arc::new(Mutex::new(Vec::new()));
    bus.add_error_handler(Arc::new(ErrorCollector {
        errors: errors.clone(),
    }));
    let listener = Arc::new(Thrower);
    bus.subscribe(&listener);

    bus.publish(7_i32);

    let errors = errors.lock();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("cannot process 7"));
    assert!(errors[0].contains('7'));
    assert_eq!(bus.stats().publication_errors, 1);
}

#[test]
fn repeated_subscribe_delivers_once_and_unsubscribe_stops_delivery() {
    let bus = bus_with(PublishMode::Exact, 2);
    let listener = Arc::new(IntListener {
        seen: Mutex::new(Vec::new()),
    });

    bus.subscribe(&listener);
    bus.subscribe(&listener);
    bus.publish(1_i32);
    assert_eq!(listener.seen.lock().len(), 1);

    bus.unsubscribe(&listener);
    bus.publish(2_i32);
    assert_eq!(listener.seen.lock().len(), 1);

    // re-subscribing reuses the permanent subscription
    bus.subscribe(&listener);
    bus.publish(3_i32);
    assert_eq!(*listener.seen.lock(), vec![1, 3]);
}

#[test]
fn dropped_listeners_are_reclaimed_and_never_invoked_again() {
    struct CountingListener {
        hits: Arc<AtomicUsize>,
    }

    impl CountingListener {
        fn on_int(&self, _n: &i32) -> HandlerResult {
            self.hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl Listener for CountingListener {
        fn handlers(set: &mut HandlerSet<Self>) {
            set.on(CountingListener::on_int);
        }
    }

    let bus = bus_with(PublishMode::Exact, 2);
    let hits = Arc::new(AtomicUsize::new(0));
    let listener = Arc::new(CountingListener { hits: hits.clone() });
    bus.subscribe(&listener);

    bus.publish(1_i32);
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    drop(listener);
    bus.publish(2_i32);
    bus.publish(3_i32);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn exact_matches_are_delivered_before_super_matches() {
    struct OrderProbe {
        order: Mutex<Vec<&'static str>>,
    }

    impl OrderProbe {
        fn on_integer(&self, _i: &IntegerLike) -> HandlerResult {
            self.order.lock().push("exact");
            Ok(())
        }

        fn on_number(&self, _n: &NumberLike) -> HandlerResult {
            self.order.lock().push("super");
            Ok(())
        }
    }

    impl Listener for OrderProbe {
        fn handlers(set: &mut HandlerSet<Self>) {
            set.on(OrderProbe::on_number);
            set.on(OrderProbe::on_integer);
        }
    }

    let bus = bus_with(PublishMode::ExactWithSuperTypes, 2);
    let listener = Arc::new(OrderProbe {
        order: Mutex::new(Vec::new()),
    });
    bus.subscribe(&listener);
    bus.publish(IntegerLike {
        number: NumberLike { value: 9 },
    });

    assert_eq!(*listener.order.lock(), vec!["exact", "super"]);
}

#[test]
fn tuple_handlers_match_exact_and_projected_signatures() {
    #[derive(Debug)]
    struct Tag {
        id: u8,
    }
    impl Message for Tag {}

    #[derive(Debug)]
    struct NarrowTag {
        tag: Tag,
    }
    impl Message for NarrowTag {
        fn parents(set: &mut SupertypeSet<Self>) {
            set.add(|n: &NarrowTag| &n.tag);
        }
    }

    struct PairListener {
        exact: AtomicUsize,
        projected: AtomicUsize,
    }

    impl PairListener {
        fn on_pair(&self, _a: &Tag, _b: &String) -> HandlerResult {
            self.exact.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn on_tags(&self, a: &Tag, b: &Tag) -> HandlerResult {
            assert!(a.id <= b.id);
            self.projected.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl Listener for PairListener {
        fn handlers(set: &mut HandlerSet<Self>) {
            set.on2(PairListener::on_pair);
            set.on2(PairListener::on_tags);
        }
    }

    let bus = bus_with(PublishMode::ExactWithSuperTypes, 2);
    let listener = Arc::new(PairListener {
        exact: AtomicUsize::new(0),
        projected: AtomicUsize::new(0),
    });
    bus.subscribe(&listener);

    bus.publish2(Tag { id: 1 }, "label".to_string());
    assert_eq!(listener.exact.load(Ordering::SeqCst), 1);

    // both positions projected onto the declared parent type
    bus.publish2(NarrowTag { tag: Tag { id: 2 } }, NarrowTag { tag: Tag { id: 3 } });
    assert_eq!(listener.projected.load(Ordering::SeqCst), 1);
}

#[test]
fn synchronized_handlers_never_overlap_per_listener() {
    struct Critical {
        inside: AtomicBool,
        overlaps: AtomicUsize,
        hits: AtomicUsize,
    }

    impl Critical {
        fn on_tick(&self, _t: &u32) -> HandlerResult {
            if self.inside.swap(true, Ordering::SeqCst) {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            std::thread::sleep(Duration::from_millis(1));
            self.inside.store(false, Ordering::SeqCst);
            self.hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl Listener for Critical {
        fn handlers(set: &mut HandlerSet<Self>) {
            set.on(Critical::on_tick).synchronized();
        }
    }

    let bus = Arc::new(bus_with(PublishMode::Exact, 2));
    let listener = Arc::new(Critical {
        inside: AtomicBool::new(false),
        overlaps: AtomicUsize::new(0),
        hits: AtomicUsize::new(0),
    });
    bus.subscribe(&listener);

    let publishers: Vec<_> = (0..2)
        .map(|_| {
            let bus = bus.clone();
            std::thread::spawn(move || {
                for n in 0..20_u32 {
                    bus.publish(n);
                }
            })
        })
        .collect();
    for publisher in publishers {
        publisher.join().expect("publisher thread");
    }

    assert_eq!(listener.hits.load(Ordering::SeqCst), 40);
    assert_eq!(listener.overlaps.load(Ordering::SeqCst), 0);
}

#[test]
fn async_publications_from_many_producers_tally_up() {
    struct Tally {
        count: Arc<AtomicUsize>,
    }

    impl Tally {
        fn on_value(&self, _v: &u64) -> HandlerResult {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl Listener for Tally {
        fn handlers(set: &mut HandlerSet<Self>) {
            set.on(Tally::on_value);
        }
    }

    let bus = Arc::new(bus_with(PublishMode::ExactWithSuperTypes, 4));
    let count = Arc::new(AtomicUsize::new(0));
    let listener = Arc::new(Tally {
        count: count.clone(),
    });
    bus.subscribe(&listener);
    bus.start();

    let producers: Vec<_> = (0..8)
        .map(|_| {
            let bus = bus.clone();
            std::thread::spawn(move || {
                for iteration in 0..100_u64 {
                    bus.publish_async(iteration % 100);
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().expect("producer thread");
    }

    // wait for the workers to drain what they will; shutdown may discard
    // whatever is still queued
    let deadline = Instant::now() + Duration::from_secs(5);
    while count.load(Ordering::SeqCst) < 800 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    bus.shutdown();

    let delivered = count.load(Ordering::SeqCst);
    assert!(delivered > 0, "workers delivered nothing");
    assert!(delivered <= 800, "over-delivery: {delivered}");
    assert!(bus.stats().async_publications <= 800);
}

#[test]
fn async_publish_after_shutdown_goes_to_the_error_sink() {
    let bus = bus_with(PublishMode::Exact, 2);
    let errors = Arc::new(Mutex::new(Vec::new()));
    bus.add_error_handler(Arc::new(ErrorCollector {
        errors: errors.clone(),
    }));
    bus.start();
    bus.shutdown();

    bus.publish_async(1_i32);

    let errors = errors.lock();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("asynchronous"));
}

#[test]
fn zero_arity_declarations_mark_the_type_as_non_listener() {
    struct Broken;

    impl Listener for Broken {
        fn handlers(set: &mut HandlerSet<Self>) {
            set.declare(crate::HandlerSpec::new(vec![], |_, _| Ok(())))
                .named("broken");
        }
    }

    let bus = bus_with(PublishMode::Exact, 2);
    let errors = Arc::new(Mutex::new(Vec::new()));
    bus.add_error_handler(Arc::new(ErrorCollector {
        errors: errors.clone(),
    }));

    let listener = Arc::new(Broken);
    bus.subscribe(&listener);
    bus.subscribe(&listener);

    let errors = errors.lock();
    assert_eq!(errors.len(), 1, "scan happens exactly once");
    assert!(errors[0].contains("no message parameters"));
    assert_eq!(bus.stats().subscriptions, 0);
}

#[test]
fn wide_tuples_reach_raw_declared_handlers() {
    use crate::{MessageRef, MessageType};

    static WIDE_HITS: AtomicUsize = AtomicUsize::new(0);

    struct Wide;

    impl Listener for Wide {
        fn handlers(set: &mut HandlerSet<Self>) {
            set.declare(crate::HandlerSpec::new(
                vec![
                    MessageType::of::<i32>(),
                    MessageType::of::<u32>(),
                    MessageType::of::<i64>(),
                    MessageType::of::<String>(),
                ],
                |_listener, args| {
                    assert_eq!(args.len(), 4);
                    WIDE_HITS.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
            ))
            .named("on_quad");
        }
    }

    let bus = bus_with(PublishMode::Exact, 2);
    let listener = Arc::new(Wide);
    bus.subscribe(&listener);

    bus.publish_dyn(vec![
        Arc::new(1_i32) as MessageRef,
        Arc::new(2_u32) as MessageRef,
        Arc::new(3_i64) as MessageRef,
        Arc::new("four".to_string()) as MessageRef,
    ]);
    assert_eq!(WIDE_HITS.load(Ordering::SeqCst), 1);

    // a different element order is a different signature
    bus.publish_dyn(vec![
        Arc::new("four".to_string()) as MessageRef,
        Arc::new(1_i32) as MessageRef,
        Arc::new(2_u32) as MessageRef,
        Arc::new(3_i64) as MessageRef,
    ]);
    assert_eq!(WIDE_HITS.load(Ordering::SeqCst), 1);
}

#[test]
fn concurrent_subscribe_unsubscribe_and_publish_stay_consistent() {
    struct Churn {
        hits: Arc<AtomicUsize>,
    }

    impl Churn {
        fn on_int(&self, _n: &i32) -> HandlerResult {
            self.hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl Listener for Churn {
        fn handlers(set: &mut HandlerSet<Self>) {
            set.on(Churn::on_int);
        }
    }

    let bus = Arc::new(bus_with(PublishMode::ExactWithSuperTypes, 2));
    let hits = Arc::new(AtomicUsize::new(0));

    let churners: Vec<_> = (0..4)
        .map(|_| {
            let bus = bus.clone();
            let hits = hits.clone();
            std::thread::spawn(move || {
                for _ in 0..50 {
                    let listener = Arc::new(Churn { hits: hits.clone() });
                    bus.subscribe(&listener);
                    bus.publish(1_i32);
                    bus.unsubscribe(&listener);
                }
            })
        })
        .collect();
    let publishers: Vec<_> = (0..2)
        .map(|_| {
            let bus = bus.clone();
            std::thread::spawn(move || {
                for n in 0..100_i32 {
                    bus.publish(n);
                }
            })
        })
        .collect();

    for handle in churners.into_iter().chain(publishers) {
        handle.join().expect("no thread panicked");
    }

    // every churner observed at least its own publication while subscribed
    assert!(hits.load(Ordering::SeqCst) >= 200);
}
