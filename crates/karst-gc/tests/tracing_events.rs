//! Collection cycles emit structured events when the `tracing` feature is
//! enabled.
#![cfg(feature = "tracing")]

mod common;

use std::io;
use std::sync::{Arc, Mutex};

use common::{addr_of_node, alloc_node, test_heap};

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl io::Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SharedBuf {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[test]
fn cycles_emit_span_and_summary_events() {
    let buf = SharedBuf::default();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(buf.clone())
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        let mut heap = test_heap();
        let node = alloc_node(&mut heap, std::ptr::null());
        let mut slot = addr_of_node(node);
        heap.add_root(std::ptr::NonNull::from(&mut slot));
        heap.collect();
        heap.remove_root(std::ptr::NonNull::from(&mut slot));
    });

    let output = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
    assert!(output.contains("gc_cycle"), "missing cycle span: {output}");
    assert!(output.contains("cycle_end"), "missing summary event: {output}");
}
