// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Configures crash reporting to write into a directory, then does whatever its mode says.
//!
//! Usage: `crashing_test_app <mode> <output_dir>`

#[cfg(not(unix))]
fn main() {}

#[cfg(unix)]
fn main() -> anyhow::Result<()> {
    unix::main()
}

#[cfg(unix)]
mod unix {
    use anyhow::Context;
    use arch_stacktrace::{
        self as arch, CommandConfig, ExtraLogLines, StackTraceConfiguration, UnwinderKind,
    };
    use bin_tests::test_types::TestMode;
    use bin_tests::validation::POSTMORTEM_MARKER;
    use std::env;
    use std::ffi::CString;
    use std::sync::{Arc, Barrier, RwLock};
    use std::time::Duration;
    use tracing_subscriber::EnvFilter;

    const POSTMORTEM_TIMEOUT: Duration = Duration::from_secs(30);
    const SHORT_TIMEOUT: Duration = Duration::from_secs(1);

    #[inline(never)]
    unsafe fn fn3() {
        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        {
            std::arch::asm!("mov eax, [0]", options(nostack));
        }

        #[cfg(target_arch = "aarch64")]
        {
            std::arch::asm!("mov x0, #0", "ldr x1, [x0]", options(nostack));
        }
    }

    #[inline(never)]
    fn fn2() {
        unsafe { fn3() }
    }

    #[inline(never)]
    fn fn1() {
        fn2()
    }

    /// Appends one line to the report: `$0` is the log, `$1` the pid and `$2` the reason.
    fn echo_postmortem() -> CommandConfig {
        let script = format!("echo \"{POSTMORTEM_MARKER} $1: $2\" >> \"$0\"");
        let argv = vec![
            "$cmd".to_string(),
            "-c".to_string(),
            script,
            "$log".to_string(),
            "$pid".to_string(),
            "$reason".to_string(),
        ];
        CommandConfig::new(Some("/bin/sh".to_string()), Some(argv.clone()), Some(argv))
    }

    fn hanging_postmortem() -> CommandConfig {
        let argv = vec!["$cmd".to_string(), "30".to_string()];
        CommandConfig::new(
            Some("/bin/sleep".to_string()),
            Some(argv.clone()),
            Some(argv),
        )
    }

    fn fatal_report(reason: &str) -> anyhow::Result<()> {
        let reason = CString::new(reason)?;
        arch::log_fatal_process_state(&reason, Some(c"reported by crashing_test_app"), None);
        Ok(())
    }

    #[inline(never)]
    pub fn main() -> anyhow::Result<()> {
        let mut args = env::args().skip(1);
        let mode: TestMode = args
            .next()
            .context("Unexpected number of arguments 1")?
            .parse()
            .map_err(anyhow::Error::msg)?;
        let output_dir = args.next().context("Unexpected number of arguments 2")?;
        anyhow::ensure!(args.next().is_none(), "unexpected extra arguments");

        let subscriber = tracing_subscriber::fmt::Subscriber::builder()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .with_writer(std::io::stderr)
            .with_target(false)
            .without_time()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;

        let (postmortem, timeout) = match mode {
            TestMode::PostmortemTimeout => (hanging_postmortem(), SHORT_TIMEOUT),
            _ => (echo_postmortem(), POSTMORTEM_TIMEOUT),
        };
        let mut config = StackTraceConfiguration::new(
            Some(postmortem),
            Some(timeout),
            None,
            None,
            None,
            Some(output_dir),
            UnwinderKind::default(),
            vec![],
            true, // create_alt_stack
            true, // use_alt_stack
        )?;
        config.set_trap_on_debugger(false);

        arch::init(None)?;
        arch::configure(&config)?;
        arch::set_program_info_for_errors("mode", mode.as_str());

        let extra: ExtraLogLines = Arc::new(RwLock::new(vec![format!("running {mode}")]));
        arch::set_extra_log_info_for_errors("crashing_test_app", Some(&extra));

        match mode {
            TestMode::Segfault => {
                arch::register_crash_handlers(&config)?;
                println!("crashing={mode}");
                fn1();
            }
            TestMode::Fatal => fatal_report("fatal test")?,
            TestMode::PostmortemTimeout => fatal_report("timeout test")?,
            TestMode::ConcurrentFatal => {
                let barrier = Arc::new(Barrier::new(2));
                let threads: Vec<_> = (0..2)
                    .map(|_| {
                        let barrier = barrier.clone();
                        std::thread::spawn(move || {
                            barrier.wait();
                            fatal_report("concurrent test")
                        })
                    })
                    .collect();
                for thread in threads {
                    thread
                        .join()
                        .map_err(|_| anyhow::anyhow!("reporting thread panicked"))??;
                }
            }
            TestMode::NonFatal => {
                arch::log_current_process_state(c"nonfatal test", None, None);
                anyhow::ensure!(
                    !arch::is_app_crashing(),
                    "nonfatal report set the crash flag"
                );
            }
            TestMode::LogStack => {
                arch::log_stack_trace(&format!("{mode} requested"), false, None)?;
            }
        }
        println!("finished={mode}");
        Ok(())
    }
}
