use std::io;

use tokio::runtime::Runtime;

/// Constructs a multi-threaded tokio [`Runtime`] with all features enabled.
///
/// Worker threads are named after `name`. A thread count of zero is raised to one.
pub fn create_runtime(name: &'static str, threads: usize) -> io::Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .thread_name(name)
        .worker_threads(threads.max(1))
        .enable_all()
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_runtime() {
        let runtime = create_runtime("test-rt", 2).unwrap();
        let name = runtime.block_on(async {
            tokio::spawn(async { std::thread::current().name().map(str::to_owned) })
                .await
                .unwrap()
        });

        assert_eq!(name.as_deref(), Some("test-rt"));
    }

    #[test]
    fn test_zero_threads() {
        let runtime = create_runtime("test-rt", 0).unwrap();
        assert_eq!(runtime.block_on(async { 1 + 1 }), 2);
    }
}
