//! Load Barrier Tests - Phase Consistency and Self-Healing
//!
//! These tests drive the barrier through real cycles on a fixture heap:
//! - Slow-Relocate and Slow-Remap resolve a reference to the same object
//! - Healed fields take the fast path afterwards
//! - Racing mutators agree on one copy per object
//! - Malformed references are fatal

mod common;

use common::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use zreloc::heap::PageSizeClass;
use zreloc::{Color, ColoredAddress, GlobalPhase};

/// Fixture with one small page of `count` live objects, referenced by one
/// field each, ready to relocate
fn relocating_fixture(count: usize) -> (RelocFixture, Vec<TestObject>, Vec<AtomicU64>) {
    let fixture = RelocFixture::new();
    let page = fixture.page(PageSizeClass::Small);
    let objects = fixture.fill(&page, count, 32);
    let fields: Vec<AtomicU64> = objects.iter().map(|obj| fixture.field(obj)).collect();
    {
        let refs: Vec<&AtomicU64> = fields.iter().collect();
        fixture.run_mark(&[(&*page, &objects[..])], &refs);
    }
    fixture.runtime.start_relocation(&[page]).unwrap();
    (fixture, objects, fields)
}

// ============================================================================
// PHASE CONSISTENCY
// ============================================================================

/// **Bug this finds:** Relocate and remap paths disagreeing on where an
/// object lives
#[test]
fn test_relocate_and_remap_resolve_same_object() {
    let (fixture, objects, fields) = relocating_fixture(16);
    let rt = &fixture.runtime;
    assert_eq!(rt.view().phase(), GlobalPhase::Relocate);

    let stale: Vec<ColoredAddress> = fields.iter().map(ColoredAddress::load).collect();
    rt.relocate().unwrap();

    let layout = fixture.layout();
    let during_relocate: Vec<u64> = stale.iter().map(|&a| rt.load(a).offset(&layout)).collect();
    for (addr, obj) in during_relocate.iter().zip(&objects) {
        assert_ne!(*addr, obj.offset, "object {:#x} not moved", obj.offset);
    }

    rt.start_mark().unwrap();
    for (i, &addr) in stale.iter().enumerate() {
        let remapped = rt.load(addr);
        assert_eq!(remapped.offset(&layout), during_relocate[i]);
        assert!(remapped.is_good(&rt.view()));
        assert_object_intact(&fixture, remapped, &objects[i]);
    }

    let stats = rt.barrier().stats();
    assert_eq!(stats.slow_relocate, 16);
    assert_eq!(stats.slow_remap, 16);
}

/// **Bug this finds:** Plain loads copying objects, or copying loads
/// disagreeing with later plain loads
#[test]
fn test_plain_load_never_copies() {
    let (fixture, objects, fields) = relocating_fixture(4);
    let rt = &fixture.runtime;
    let view = rt.view();
    let layout = fixture.layout();

    let stale = ColoredAddress::load(&fields[0]);
    let before = rt.load(stale);
    assert_eq!(before.offset(&layout), objects[0].offset);
    assert_eq!(rt.snapshot().forwarded_objects(), 0);

    let moved = rt.barrier().load_or_relocate(stale, &view).unwrap();
    assert_ne!(moved.offset(&layout), objects[0].offset);
    assert_eq!(rt.load(stale), moved);
    assert_eq!(rt.snapshot().forwarded_objects(), 1);
    assert_object_intact(&fixture, moved, &objects[0]);
}

/// **Bug this finds:** References into pages outside the relocation set
/// being treated as forwarded
#[test]
fn test_unrelocated_page_only_recolors() {
    let fixture = RelocFixture::new();
    let rt = &fixture.runtime;
    let moving = fixture.page(PageSizeClass::Small);
    let staying = fixture.page(PageSizeClass::Small);
    let moving_objects = fixture.fill(&moving, 2, 16);
    let staying_objects = fixture.fill(&staying, 2, 16);

    let field = fixture.field(&staying_objects[0]);
    fixture.run_mark(
        &[(&*moving, &moving_objects[..]), (&*staying, &staying_objects[..])],
        &[&field],
    );
    rt.start_relocation(&[Arc::clone(&moving)]).unwrap();

    let healed = rt.load_slot(&field);
    assert_eq!(healed.offset(&fixture.layout()), staying_objects[0].offset);
    assert!(healed.is_remapped(&fixture.layout()));
    assert_eq!(field.load(Ordering::Acquire), healed.raw());
}

// ============================================================================
// SELF-HEALING
// ============================================================================

/// **Bug this finds:** Fields not updated after the slow path, so every
/// load pays for the lookup again
#[test]
fn test_healed_field_takes_fast_path() {
    let (fixture, objects, fields) = relocating_fixture(8);
    let rt = &fixture.runtime;
    rt.relocate().unwrap();
    rt.barrier().reset_stats();

    for (field, obj) in fields.iter().zip(&objects) {
        let first = rt.load_slot(field);
        assert_object_intact(&fixture, first, obj);
        let second = rt.load_slot(field);
        assert_eq!(first, second);
    }

    let stats = rt.barrier().stats();
    assert_eq!(stats.healed, 8);
    assert_eq!(stats.slow_relocate, 8);
    assert_eq!(stats.fast_path, 8);
}

/// **Bug this finds:** Healing overwriting a value stored concurrently by
/// the mutator
#[test]
fn test_heal_does_not_overwrite_newer_store() {
    let (fixture, _, fields) = relocating_fixture(2);
    let rt = &fixture.runtime;
    let view = rt.view();
    let layout = fixture.layout();
    rt.relocate().unwrap();

    let stale = ColoredAddress::load(&fields[0]);
    let newer = ColoredAddress::load(&fields[1]);
    // Mutator stores a different reference between the load and the heal
    fields[0].store(newer.raw(), Ordering::Release);

    let healed = rt.barrier().load(stale, &view);
    assert_eq!(ColoredAddress::heal(&fields[0], stale, healed), newer);
    assert_eq!(ColoredAddress::load(&fields[0]).offset(&layout), newer.offset(&layout));
}

/// **Bug this finds:** Two mutators copying the same object, or a copy
/// published before its contents
#[test]
fn test_racing_mutators_share_one_copy() {
    const MUTATORS: usize = 8;
    let (fixture, objects, fields) = relocating_fixture(24);
    let rt = &fixture.runtime;

    let seen: Vec<Vec<u64>> = crossbeam::scope(|s| {
        let handles: Vec<_> = (0..MUTATORS)
            .map(|t| {
                let fields = &fields;
                s.spawn(move |_| {
                    let layout = *rt.heap().layout();
                    let mut offsets = vec![0; fields.len()];
                    // Alternate direction so threads meet in the middle
                    let order: Vec<usize> = if t % 2 == 0 {
                        (0..fields.len()).collect()
                    } else {
                        (0..fields.len()).rev().collect()
                    };
                    for i in order {
                        let addr = rt.load_slot_or_relocate(&fields[i]).unwrap();
                        offsets[i] = addr.offset(&layout);
                    }
                    offsets
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
    .unwrap();

    for offsets in &seen[1..] {
        assert_eq!(offsets, &seen[0], "mutators resolved different copies");
    }
    assert_offsets_unique(&seen[0], "relocated objects");

    for (field, obj) in fields.iter().zip(&objects) {
        assert_object_intact(&fixture, ColoredAddress::load(field), obj);
    }

    let copy = rt.driver().relocator().stats().snapshot();
    assert_eq!(copy.objects_copied, 24);
    assert!(copy.allocations_undone <= copy.races_lost);
}

// ============================================================================
// FAILURE MODES
// ============================================================================

/// **Bug this finds:** Garbage values silently recolored into references
#[test]
#[should_panic(expected = "non-heap reference")]
fn test_multi_colored_value_is_fatal() {
    let (fixture, _, _) = relocating_fixture(1);
    let layout = fixture.layout();
    let garbage = ColoredAddress::from_raw(layout.marked0() | layout.marked1() | 0x40);
    fixture.runtime.load(garbage);
}

#[test]
fn test_null_passes_every_phase() {
    let fixture = RelocFixture::new();
    let rt = &fixture.runtime;
    let null = AtomicU64::new(0);

    assert!(rt.load_slot(&null).is_null());
    rt.start_mark().unwrap();
    assert!(rt.load_slot(&null).is_null());
    rt.end_mark().unwrap();
    assert!(rt.load_slot_or_relocate(&null).unwrap().is_null());
    assert_eq!(rt.barrier().stats().null_references, 3);
}

/// **Bug this finds:** Finalizable references forced through the slow path
#[test]
fn test_finalizable_reference_fast_path() {
    let fixture = RelocFixture::new();
    let rt = &fixture.runtime;
    let page = fixture.page(PageSizeClass::Small);
    let obj = fixture.fill(&page, 1, 16)[0];

    let view = rt.start_mark().unwrap();
    let fin = ColoredAddress::colored(obj.offset, Color::Marked1, &fixture.layout())
        .finalizable_good(&view);
    assert!(fin.is_weak_good(&view));
    assert_eq!(rt.load(fin).offset(&fixture.layout()), obj.offset);
    assert_eq!(rt.barrier().stats().slow_path_count(), 0);
}

/// **Bug this finds:** Finalizable references from an earlier phase
/// rejected as garbage once the view flips
#[test]
fn test_finalizable_reference_across_phase_flip() {
    let fixture = RelocFixture::new();
    let rt = &fixture.runtime;
    let layout = fixture.layout();
    let page = fixture.page(PageSizeClass::Small);
    let objects = fixture.fill(&page, 2, 32);
    let field = fixture.field(&objects[0]);

    let view = rt.start_mark().unwrap();
    fixture.mark_live(&page, &objects);
    let fin = rt.reference(objects[0].offset).finalizable_good(&view);
    let fin_field = AtomicU64::new(fin.raw());
    let good = rt.load(ColoredAddress::load(&field));
    field.store(good.raw(), Ordering::Release);
    rt.end_mark().unwrap();

    rt.start_relocation(&[Arc::clone(&page)]).unwrap();
    assert!(fin.is_weak_bad(&rt.view()));

    // Plain load: the object waits to be copied
    let unmoved = rt.load(fin);
    assert_eq!(unmoved.offset(&layout), objects[0].offset);
    assert!(!unmoved.is_finalizable(&layout));

    let moved = rt.load_slot_or_relocate(&fin_field).unwrap();
    assert_ne!(moved.offset(&layout), objects[0].offset);
    assert_object_intact(&fixture, moved, &objects[0]);
    assert_eq!(rt.load_slot(&field), moved);

    rt.relocate().unwrap();
    rt.start_mark().unwrap();
    let remapped = rt.load(fin);
    assert_eq!(remapped.offset(&layout), moved.offset(&layout));
    assert!(remapped.is_good(&rt.view()));
}
