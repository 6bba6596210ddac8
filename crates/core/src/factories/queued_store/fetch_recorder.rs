use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
};

/// Records the paths fetched during a window, e.g. a single command.
///
/// Recording is enabled by [FetchRecorder::start] and disabled and
/// drained by [FetchRecorder::stop]. While disabled, [FetchRecorder::record]
/// costs a single atomic load.
#[derive(Debug, Default)]
pub(crate) struct FetchRecorder {
    recording: AtomicBool,
    paths: Mutex<HashSet<String>>,
}

impl FetchRecorder {
    pub fn start(&self) {
        self.recording.store(true, Ordering::Release);
    }

    pub fn record(&self, path: &str) {
        if !self.recording.load(Ordering::Acquire) {
            return;
        }
        self.paths.lock().unwrap().insert(path.to_string());
    }

    pub fn stop(&self) -> HashSet<String> {
        self.recording.store(false, Ordering::Release);
        std::mem::take(&mut *self.paths.lock().unwrap())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn records_only_inside_window() {
        let recorder = FetchRecorder::default();
        recorder.record("before");

        recorder.start();
        recorder.record("a/b");
        recorder.record("a/b");
        recorder.record("c");
        let paths = recorder.stop();

        recorder.record("after");

        assert_eq!(2, paths.len());
        assert!(paths.contains("a/b"));
        assert!(paths.contains("c"));

        // the set was drained
        recorder.start();
        assert!(recorder.stop().is_empty());
    }
}
