use std::process::{Command, Stdio};

use memstrings::attach::{AttachError, Pid, Tracer};
use memstrings::maps::MemoryRegion;
use memstrings::scanner::{StringMatch, is_printable};
use memstrings::{Scan, ScanConfig, ScanError, scan_process};

const MARKER: &str = "memstrings-integration-marker";

/// Tracer for scanning our own process, which needs no ptrace grant.
struct SelfTracer;

impl Tracer for SelfTracer {
    fn attach(&self, _pid: Pid) -> Result<(), AttachError> {
        Ok(())
    }

    fn detach(&self, _pid: Pid) -> std::io::Result<()> {
        Ok(())
    }
}

fn config() -> ScanConfig {
    ScanConfig {
        max_region_size: Some(256 << 20),
        ..Default::default()
    }
}

#[test]
fn test_scan_own_process() -> anyhow::Result<()> {
    let marker = std::hint::black_box(MARKER.to_string());
    let pid = Pid::new(std::process::id() as i32);

    let mut found: Vec<StringMatch> = vec![];
    let summary = Scan::new(config()).run_with(SelfTracer, pid, |m| {
        found.push(m.clone());
        Ok(())
    })?;

    assert!(summary.scanned_regions > 0);
    assert_eq!(summary.matches, found.len());
    assert!(found.iter().any(|m| m.text.contains(&marker)));
    assert!(
        found
            .iter()
            .all(|m| m.text.len() >= 4 && m.text.bytes().all(is_printable))
    );
    Ok(())
}

#[test]
fn test_matches_lie_within_their_region() -> anyhow::Result<()> {
    let maps = std::fs::read_to_string("/proc/self/maps")?;
    let regions: Vec<MemoryRegion> = maps
        .lines()
        .filter_map(|l| memstrings::maps::parse_maps_line(l).ok())
        .collect();

    let pid = Pid::new(std::process::id() as i32);
    let mut outside = vec![];
    Scan::new(config()).run_with(SelfTracer, pid, |m| {
        if !regions.iter().any(|r| {
            r.contains(m.address) && m.address + m.text.len() as u64 <= r.end
        }) {
            outside.push(m.address);
        }
        Ok(())
    })?;
    // mappings created after the snapshot above may legitimately be missing
    assert!(outside.len() < 16, "matches outside regions: {:x?}", outside);
    Ok(())
}

#[test]
fn test_scan_survives_huge_reservation() -> anyhow::Result<()> {
    const RESERVATION: usize = 64 << 30;
    let addr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            RESERVATION,
            libc::PROT_NONE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
            -1,
            0,
        )
    };
    assert_ne!(addr, libc::MAP_FAILED, "{}", std::io::Error::last_os_error());

    let marker = std::hint::black_box(MARKER.to_string());
    let pid = Pid::new(std::process::id() as i32);
    let mut found = false;
    let res = Scan::new(ScanConfig::default()).run_with(SelfTracer, pid, |m| {
        found |= m.text.contains(&marker);
        Ok(())
    });
    unsafe { libc::munmap(addr, RESERVATION) };

    let summary = res?;
    assert!(summary.unreadable_regions > 0);
    assert!(found);
    Ok(())
}

#[test]
fn test_attach_to_missing_process() {
    let mut called = false;
    let res = scan_process(Pid::new(0x7fff_fff0), &ScanConfig::default(), |_| {
        called = true;
        Ok(())
    });
    assert!(matches!(
        res,
        Err(ScanError::Attach(AttachError::PermissionOrTarget { .. }))
    ));
    assert!(!called);
}

fn process_state(pid: u32) -> anyhow::Result<char> {
    let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid))?;
    // the command name may contain spaces, the state follows its closing paren
    let state = stat
        .rsplit_once(") ")
        .and_then(|(_, rest)| rest.chars().next())
        .ok_or_else(|| anyhow::anyhow!("malformed stat line: {}", stat))?;
    Ok(state)
}

#[test]
#[ignore]
fn test_attach_stops_and_detach_resumes_child() -> anyhow::Result<()> {
    let mut child = Command::new("sleep")
        .arg("30")
        .stdout(Stdio::null())
        .spawn()?;
    std::thread::sleep(std::time::Duration::from_millis(200));

    let states = (|| -> anyhow::Result<(char, char)> {
        let session = memstrings::attach::attach(Pid::new(child.id() as i32))?;
        let stopped = process_state(child.id())?;
        session.detach();
        std::thread::sleep(std::time::Duration::from_millis(50));
        Ok((stopped, process_state(child.id())?))
    })();
    child.kill()?;
    child.wait()?;

    let (stopped, resumed) = states?;
    assert_eq!(stopped, 't');
    assert_ne!(resumed, 't');
    Ok(())
}

#[test]
#[ignore]
fn test_scan_child_process() -> anyhow::Result<()> {
    env_logger::init();
    let mut child = Command::new("sleep")
        .arg("30")
        .env("MEMSTRINGS_MARKER", MARKER)
        .stdout(Stdio::null())
        .spawn()?;
    // give the child time to exec
    std::thread::sleep(std::time::Duration::from_millis(200));

    let pid = Pid::new(child.id() as i32);
    let mut found = false;
    let res = scan_process(pid, &config(), |m| {
        found |= m.text.contains(MARKER);
        Ok(())
    });
    child.kill()?;
    child.wait()?;

    let summary = res?;
    println!("{:?}", summary);
    assert!(found, "environment marker not found in child memory");
    Ok(())
}
