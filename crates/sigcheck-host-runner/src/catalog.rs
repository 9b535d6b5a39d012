//! The c-archive signal scenarios.

use crate::pipeline::{ArchiveBuild, LinkStep, WORKSPACE_PLACEHOLDER};
use crate::platform::{Applicability, SkipRule};
use crate::scenario::{ArtifactCheck, Expectation, Phase, RunStep, Scenario, SetupStep};
use crate::termination::Signal;

const ISSUE_13701: &str = "signal forwarding is unsupported, see golang.org/issue/13701";
const NO_SIGNALS: &str = "no signal tests on windows";

const SIGNAL_FORWARDING_GAPS: &[SkipRule] = &[
    SkipRule::os_arch("darwin", &["arm", "arm64"], ISSUE_13701),
    SkipRule::os("windows", NO_SIGNALS),
];

const WINDOWS_GAP: &[SkipRule] = &[SkipRule::os("windows", NO_SIGNALS)];

const PIE_GAPS: &[SkipRule] = &[
    SkipRule::os("windows", "no PIE test on windows"),
    SkipRule::os("darwin", "no PIE test on darwin"),
    SkipRule::os("plan9", "no PIE test on plan9"),
];

const SIGPROF_GAPS: &[SkipRule] = &[
    SkipRule::os("windows", "no SIGPROF test on windows"),
    SkipRule::os("plan9", "no SIGPROF test on plan9"),
    SkipRule::os("darwin", "SIGPROF is unreliable, see golang.org/issue/19320"),
];

const FAKE_AR: &str = "testar";
const FAKE_AR_MARKER: &str = "testar.ran";

pub fn scenarios() -> Vec<Scenario> {
    vec![
        install(),
        early_signal_handler(),
        signal_forwarding(),
        signal_forwarding_external(),
        os_signal(),
        sigaltstack(),
        extar(),
        pie(),
        sigprof(),
        compile_without_shared(),
    ]
}

pub fn find(id: &str) -> Option<Scenario> {
    scenarios().into_iter().find(|s| s.id == id)
}

fn install_run() -> RunStep {
    RunStep::expect(&["arg1", "arg2"], Expectation::CleanExit)
}

fn install_link(exe: &str) -> LinkStep {
    LinkStep::new(exe, &["main.c"]).with_platform_main()
}

fn install() -> Scenario {
    Scenario {
        id: "install",
        summary: "install, build-from-file and build -o all yield a runnable archive",
        applies: Applicability::ALL,
        phases: vec![
            Phase::new(ArchiveBuild::install("libgo"))
                .link(install_link("testp1"))
                .run(install_run()),
            Phase::new(ArchiveBuild::from_file("libgo"))
                .link(install_link("testp2"))
                .run(install_run()),
            Phase::new(ArchiveBuild::with_output("libgo"))
                .link(install_link("testp3"))
                .run(install_run()),
        ],
    }
}

fn early_signal_handler() -> Scenario {
    Scenario {
        id: "early_signal_handler",
        summary: "a C handler installed before the runtime starts keeps working",
        applies: Applicability::skip_on(SIGNAL_FORWARDING_GAPS),
        phases: vec![Phase::new(ArchiveBuild::with_output("libgo2"))
            .link(LinkStep::new("testp", &["main2.c"]))
            .run(RunStep::expect(&[], Expectation::CleanExit))],
    }
}

fn signal_forwarding() -> Scenario {
    Scenario {
        id: "signal_forwarding",
        summary: "signals raised on a C thread are forwarded to the default action",
        applies: Applicability::skip_on(SIGNAL_FORWARDING_GAPS),
        phases: vec![Phase::new(ArchiveBuild::with_output("libgo2"))
            .link(LinkStep::new("testp", &["main5.c"]))
            .run(RunStep::expect(&["1"], Expectation::Signal(Signal::SIGSEGV)))
            .run(RunStep::expect(&["3"], Expectation::Signal(Signal::SIGPIPE)))],
    }
}

fn signal_forwarding_external() -> Scenario {
    Scenario {
        id: "signal_forwarding_external",
        summary: "an externally sent SIGSEGV kills the process",
        applies: Applicability::skip_on(SIGNAL_FORWARDING_GAPS),
        phases: vec![Phase::new(ArchiveBuild::with_output("libgo2"))
            .link(LinkStep::new("testp", &["main5.c"]))
            .run(RunStep::signal_trials(&["2"], Signal::SIGSEGV))],
    }
}

fn os_signal() -> Scenario {
    Scenario {
        id: "os_signal",
        summary: "os/signal.Notify works in a library",
        applies: Applicability::skip_on(WINDOWS_GAP),
        phases: vec![Phase::new(ArchiveBuild::with_output("libgo3"))
            .link(LinkStep::new("testp", &["main3.c"]))
            .run(RunStep::expect(&[], Expectation::CleanExit))],
    }
}

fn sigaltstack() -> Scenario {
    Scenario {
        id: "sigaltstack",
        summary: "a C-installed alternate signal stack survives calls into the runtime",
        applies: Applicability::skip_on(WINDOWS_GAP),
        phases: vec![Phase::new(ArchiveBuild::with_output("libgo4"))
            .link(LinkStep::new("testp", &["main4.c"]))
            .run(RunStep::expect(&[], Expectation::CleanExit))],
    }
}

fn extar() -> Scenario {
    Scenario {
        id: "extar",
        summary: "the linker honours an external archiver override",
        applies: Applicability::skip_on(WINDOWS_GAP),
        phases: vec![Phase::new(
            ArchiveBuild::with_output("libgo4")
                .flag(format!("-ldflags=-extar={WORKSPACE_PLACEHOLDER}/{FAKE_AR}")),
        )
        .setup(SetupStep::WriteFakeArchiver {
            name: FAKE_AR.to_string(),
            marker: FAKE_AR_MARKER.to_string(),
        })
        .check(ArtifactCheck::FileExists {
            path: FAKE_AR_MARKER.to_string(),
        })],
    }
}

fn pie() -> Scenario {
    Scenario {
        id: "pie",
        summary: "a PIE link against the archive has no text relocations",
        applies: Applicability::skip_on(PIE_GAPS),
        phases: vec![Phase::new(ArchiveBuild::install("libgo"))
            .link(
                LinkStep::new("testp", &["main.c", "main_unix.c"]).flags(&["-fPIE", "-pie"]),
            )
            .run(install_run())
            .check(ArtifactCheck::NoTextRelocations)],
    }
}

fn sigprof() -> Scenario {
    Scenario {
        id: "sigprof",
        summary: "SIGPROF-driven profiling inside the library does not crash the host",
        applies: Applicability::skip_on(SIGPROF_GAPS),
        phases: vec![Phase::new(ArchiveBuild::with_output("libgo6"))
            .link(LinkStep::new("testp6", &["main6.c"]))
            .run(RunStep::expect(&[], Expectation::CleanExit))],
    }
}

fn compile_without_shared() -> Scenario {
    Scenario {
        id: "compile_without_shared",
        summary: "an archive compiled without -shared still forwards SIGPIPE",
        applies: Applicability::skip_on(SIGNAL_FORWARDING_GAPS),
        phases: vec![Phase::new(
            ArchiveBuild::with_output("libgo2").flag("-gcflags=-shared=false"),
        )
        .link(LinkStep::new("testnoshared", &["main5.c"]))
        .run(RunStep::expect(&["3"], Expectation::Signal(Signal::SIGPIPE)))],
    }
}
