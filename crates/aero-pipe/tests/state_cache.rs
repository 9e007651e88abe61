mod common;

use std::sync::Arc;

use aero_pipe::state::{BlendState, RasterizerState};
use aero_pipe::trace::TraceOptions;
use aero_pipe::validate::StateBinder;
use aero_pipe::{PipeCall, PipeContext, Screen, TraceContext};
use pretty_assertions::assert_eq;

#[test]
fn equal_states_share_one_backend_object() {
    let mut ctx = common::trace_context();
    let mut binder = StateBinder::default();

    let blend = BlendState::disabled();
    assert!(binder.set_blend(&mut ctx, &blend));
    assert!(binder.set_blend(&mut ctx, &blend.clone()));

    let mut rs = RasterizerState::disabled();
    assert!(binder.set_rasterizer(&mut ctx, &rs));
    rs.line_width = 2.0;
    assert!(binder.set_rasterizer(&mut ctx, &rs));

    assert_eq!(ctx.count(PipeCall::is_state_creation), 3);
    // The second identical blend bind is elided.
    assert_eq!(
        ctx.count(|c| matches!(c, PipeCall::Bind(aero_pipe::trace::CsoKind::Blend, _))),
        1
    );
    let stats = ctx.screen().state_cache().stats();
    assert_eq!((stats.blend.hits, stats.blend.misses), (1, 1));
    assert_eq!(stats.rasterizer.entries, 2);
}

#[test]
fn contexts_on_different_threads_create_each_state_once() {
    let screen = Screen::new();
    let threads: Vec<_> = (0..8)
        .map(|_| {
            let screen = Arc::clone(&screen);
            std::thread::spawn(move || {
                let mut ctx = TraceContext::new(screen);
                let mut binder = StateBinder::default();
                for _ in 0..16 {
                    assert!(binder.set_blend(&mut ctx, &BlendState::disabled()));
                }
                ctx.count(PipeCall::is_state_creation)
            })
        })
        .collect();

    let created: usize = threads.into_iter().map(|t| t.join().unwrap()).sum();
    assert_eq!(created, 1);
    assert_eq!(screen.state_cache().stats().blend.entries, 1);
}

#[test]
fn failed_creation_leaves_the_binding_untouched() {
    common::init_tracing();
    let mut ctx = TraceContext::with_options(
        Screen::new(),
        TraceOptions {
            fail_creates: true,
            ..TraceOptions::default()
        },
    );
    let mut binder = StateBinder::default();
    assert!(!binder.set_blend(&mut ctx, &BlendState::disabled()));
    assert_eq!(binder.blend(), None);

    ctx.options_mut().fail_creates = false;
    assert!(binder.set_blend(&mut ctx, &BlendState::disabled()));
    assert!(binder.blend().is_some());
}

#[test]
fn destroying_the_cache_deletes_every_object() {
    let mut ctx = common::trace_context();
    let mut binder = StateBinder::default();
    let mut blend = BlendState::disabled();
    binder.set_blend(&mut ctx, &blend);
    blend.alpha_to_one = true;
    binder.set_blend(&mut ctx, &blend);
    assert_eq!(ctx.live_objects(), 2);

    let screen = ctx.screen().clone();
    screen.state_cache().destroy(&mut ctx);
    assert_eq!(ctx.live_objects(), 0);
    assert!(screen.state_cache().stats().blend.entries == 0);
}
