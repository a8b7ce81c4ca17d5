#[cfg(test)]
mod tests {
    use promise_ctx::{
        Builder, Context, ContextError, DataContext, Error, PromiseContext, PromiseGroup,
    };
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    #[derive(Debug, Default)]
    struct PromiseContextData {
        int_data: i32,
    }

    type DataCtx = DataContext<Option<PromiseContextData>>;

    #[test]
    fn test_group_error_skips_remaining_steps() {
        let ctx = Context::background();
        let fourth_ran = Arc::new(AtomicBool::new(false));
        let flag = fourth_ran.clone();
        let group = PromiseGroup::<i32, DataCtx>::new(DataContext::new)
            .add(|ctx, resolve, _reject| {
                ctx.data = Some(PromiseContextData { int_data: 1 });
                resolve.resolve_default()
            })
            .add(|ctx, resolve, _reject| {
                assert_eq!(ctx.data.as_ref().map(|d| d.int_data), Some(1));
                resolve.resolve_default()
            })
            .add(|ctx, _resolve, reject| {
                assert_eq!(ctx.data.as_ref().map(|d| d.int_data), Some(1));
                reject.reject("error")
            })
            .add(move |_ctx, _resolve, _reject| {
                flag.store(true, Ordering::SeqCst);
                panic!("i should never be called")
            });
        let err = group.execute(&ctx).wait(&ctx).unwrap_err();
        assert_eq!(err.to_string(), "error");
        assert!(!fourth_ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_group_resolving_with_payload() {
        let ctx = Context::background();
        let resolve_value = 12341;
        let mut group = PromiseGroup::<i32, DataCtx>::new(DataContext::new)
            .add(|ctx, resolve, _reject| {
                ctx.data = Some(PromiseContextData { int_data: 123 });
                resolve.resolve_default()
            })
            .add(|ctx, resolve, _reject| {
                ctx.data = Some(PromiseContextData { int_data: 124 });
                resolve.resolve_default()
            });
        group.push(move |ctx, resolve, _reject| {
            if ctx.data.as_ref().map(|d| d.int_data) == Some(124) {
                resolve.resolve(resolve_value)
            }
        });
        assert_eq!(group.len(), 3);
        assert_eq!(group.execute(&ctx).wait(&ctx).unwrap(), resolve_value);
    }

    #[test]
    fn test_last_value_wins() {
        let ctx = Context::background();
        let group = PromiseGroup::<&str>::new_default()
            .add(|_ctx, resolve, _reject| resolve.resolve("Step 1"))
            .add(|_ctx, resolve, _reject| resolve.resolve("Step 2"));
        assert_eq!(group.execute(&ctx).wait(&ctx).unwrap(), "Step 2");
    }

    trait Doer: Send {
        fn do_it(&self) -> Deed;
    }

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Deed {
        label: &'static str,
    }

    impl Doer for Deed {
        fn do_it(&self) -> Deed {
            self.clone()
        }
    }

    #[test]
    fn test_trait_object_payload() {
        let ctx = Context::background();
        let group = PromiseGroup::<Deed, DataContext<Option<Box<dyn Doer>>>>::new(DataContext::new)
            .add(|ctx, resolve, _reject| {
                ctx.data = Some(Box::new(Deed { label: "did it" }));
                resolve.resolve_default()
            })
            .add(|ctx, resolve, reject| match &ctx.data {
                Some(doer) => resolve.resolve(doer.do_it()),
                None => reject.reject("no doer"),
            });
        assert_eq!(
            group.execute(&ctx).wait(&ctx).unwrap(),
            Deed { label: "did it" }
        );
    }

    #[test]
    fn test_steps_never_overlap() {
        let ctx = Context::background();
        let running = Arc::new(AtomicUsize::new(0));
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut group = PromiseGroup::<usize>::new_default();
        for index in 0..5 {
            let running = running.clone();
            let order = order.clone();
            group.push(move |_ctx, resolve, _reject| {
                assert_eq!(running.fetch_add(1, Ordering::SeqCst), 0);
                // Settle first, then keep working: the next step must still wait.
                resolve.resolve(index);
                thread::sleep(Duration::from_millis(10));
                order.lock().unwrap().push(index);
                running.fetch_sub(1, Ordering::SeqCst);
            });
        }
        assert_eq!(group.execute(&ctx).wait(&ctx).unwrap(), 4);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_failure_cancels_shared_context() {
        let ctx = Context::background();
        let seen = Arc::new(Mutex::new(None::<Context>));
        let record = seen.clone();
        let group = PromiseGroup::<()>::new_default()
            .add(move |ctx, resolve, _reject| {
                *record.lock().unwrap() = Some(ctx.context().clone());
                resolve.resolve(())
            })
            .add(|_ctx, _resolve, reject| reject.reject("step two failed"))
            .add(|_ctx, resolve, _reject| resolve.resolve(()));
        let err = group.execute(&ctx).wait(&ctx).unwrap_err();
        assert_eq!(err.to_string(), "step two failed");

        let shared = seen.lock().unwrap().take().expect("first step never ran");
        assert_eq!(shared.err(), Some(ContextError::Canceled));
        assert!(!ctx.is_done());
    }

    #[test]
    fn test_last_step_failure_cancels_too() {
        let ctx = Context::background();
        let seen = Arc::new(Mutex::new(None::<Context>));
        let record = seen.clone();
        let group = PromiseGroup::<()>::new_default().add(move |ctx, _resolve, reject| {
            *record.lock().unwrap() = Some(ctx.context().clone());
            reject.reject("last failed")
        });
        assert!(group.execute(&ctx).wait(&ctx).is_err());
        let shared = seen.lock().unwrap().take().expect("step never ran");
        assert!(shared.is_done());
    }

    #[test]
    fn test_cancelled_base_runs_nothing() {
        let (ctx, cancel) = Context::with_cancel(&Context::background());
        cancel.cancel();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let group = PromiseGroup::<()>::new_default().add(move |_ctx, resolve, _reject| {
            flag.store(true, Ordering::SeqCst);
            resolve.resolve(())
        });
        let waiter = Context::background();
        let err = group.execute(&ctx).wait(&waiter).unwrap_err();
        assert_eq!(err.context_error(), Some(ContextError::Canceled));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_step_cancelling_stops_the_rest() {
        let ctx = Context::background();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let group = PromiseGroup::<()>::new_default()
            .add(|ctx, resolve, _reject| {
                ctx.cancel();
                resolve.resolve(())
            })
            .add(move |_ctx, resolve, _reject| {
                flag.store(true, Ordering::SeqCst);
                resolve.resolve(())
            });
        let err = group.execute(&ctx).wait(&ctx).unwrap_err();
        assert_eq!(err.context_error(), Some(ContextError::Canceled));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_step_panic_rejects_group() {
        let ctx = Context::background();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let group = PromiseGroup::<u8>::new_default()
            .add(|_ctx, _resolve, _reject| panic!("step exploded"))
            .add(move |_ctx, resolve, _reject| {
                flag.store(true, Ordering::SeqCst);
                resolve.resolve(1)
            });
        let err = group.execute(&ctx).wait(&ctx).unwrap_err();
        assert!(matches!(err, Error::Unknown));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_earlier_step_values_are_discarded() {
        let ctx = Context::background();
        let group = PromiseGroup::<u8>::new_default()
            .add(|_ctx, resolve, _reject| resolve.resolve_any("intermediate string"))
            .add(|_ctx, resolve, _reject| resolve.resolve(1));
        assert_eq!(group.execute(&ctx).wait(&ctx).unwrap(), 1);
    }

    #[derive(Debug, PartialEq)]
    struct Receipt(u32);

    #[test]
    fn test_earlier_steps_need_no_result_value() {
        let ctx = Context::background();
        let group = PromiseGroup::<Receipt>::new_default()
            .add(|_ctx, resolve, _reject| resolve.resolve_any(()))
            .add(|_ctx, resolve, _reject| resolve.resolve_any(vec![1, 2, 3]))
            .add(|_ctx, resolve, _reject| resolve.resolve(Receipt(7)));
        assert_eq!(group.execute(&ctx).wait(&ctx).unwrap(), Receipt(7));
    }

    #[test]
    fn test_last_step_type_mismatch_rejects_group() {
        let ctx = Context::background();
        let group = PromiseGroup::<u8>::new_default()
            .add(|_ctx, resolve, _reject| resolve.resolve(1))
            .add(|_ctx, resolve, _reject| resolve.resolve_any("not a byte"));
        let err = group.execute(&ctx).wait(&ctx).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
    }

    #[test]
    fn test_cancelling_base_rejects_without_waiting_for_step() {
        let (base, cancel) = Context::with_cancel(&Context::background());
        let seen = Arc::new(Mutex::new(None::<Context>));
        let record = seen.clone();
        let group = PromiseGroup::<()>::new_default().add(move |ctx, resolve, _reject| {
            *record.lock().unwrap() = Some(ctx.context().clone());
            // Deliberately deaf to cancellation.
            thread::sleep(Duration::from_millis(1500));
            resolve.resolve(())
        });
        let promise = group.execute(&base);
        thread::sleep(Duration::from_millis(50));
        let start = Instant::now();
        cancel.cancel();

        let waiter = Context::background();
        let err = promise.wait(&waiter).unwrap_err();
        assert!(start.elapsed() < Duration::from_millis(500));
        assert_eq!(err.context_error(), Some(ContextError::Canceled));
        let shared = seen.lock().unwrap().take().expect("step never ran");
        assert!(shared.is_done());
    }

    #[test]
    fn test_unsettled_step_rejects_group() {
        let ctx = Context::background();
        let group = PromiseGroup::<u8>::new_default()
            .add(|_ctx, _resolve, _reject| {})
            .add(|_ctx, resolve, _reject| resolve.resolve(1));
        let err = group.execute(&ctx).wait(&ctx).unwrap_err();
        assert!(matches!(err, Error::NotFulfilled));
    }

    #[test]
    fn test_empty_group_is_not_fulfilled() {
        let ctx = Context::background();
        let group = PromiseGroup::<u8>::new_default();
        assert!(group.is_empty());
        let err = group.execute(&ctx).wait(&ctx).unwrap_err();
        assert!(matches!(err, Error::NotFulfilled));
    }

    #[test]
    fn test_wait_on_group_times_out() {
        let root = Context::background();
        let group = PromiseGroup::<()>::new_default().add(|_ctx, resolve, _reject| {
            thread::sleep(Duration::from_millis(300));
            resolve.resolve(())
        });
        let promise = group.execute(&root);
        let (impatient, _cancel) = Context::with_timeout(&root, Duration::from_millis(20));
        let err = promise.wait(&impatient).unwrap_err();
        assert_eq!(err.context_error(), Some(ContextError::DeadlineExceeded));
        promise.wait(&root).unwrap();
    }

    #[test]
    fn test_group_builder_names_steps() {
        let ctx = Context::background();
        let group = PromiseGroup::<Option<String>>::new_default()
            .with_builder(Builder::default().name("pipeline"))
            .add(|_ctx, resolve, _reject| {
                resolve.resolve(thread::current().name().map(str::to_owned))
            });
        assert_eq!(
            group.execute(&ctx).wait(&ctx).unwrap().as_deref(),
            Some("pipeline")
        );
    }
}
