use oncpu::export::{write_folded, JsonReport};
use oncpu::profiling::{RunnerStats, StackTable};
use std::fs::File;
use std::io::BufWriter;

fn frames(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| (*n).to_string()).collect()
}

fn sample_table() -> StackTable {
    let mut table = StackTable::new();
    table.record_n(frames(&["parse", "run", "main"]), 5);
    table.record_n(frames(&["0x7f00dead", "run", "main"]), 2);
    table.record(frames(&["main"]));
    table
}

#[test]
fn test_folded_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stacks.txt");

    write_folded(&sample_table(), BufWriter::new(File::create(&path).unwrap())).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    println!("{text}");

    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines, vec!["main;run;parse 5", "main;run;0x7f00dead 2", "main 1"]);
    let total: u64 = lines.iter().filter_map(|l| l.rsplit(' ').next()?.parse::<u64>().ok()).sum();
    assert_eq!(total, 8);
}

#[test]
fn test_json_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.json");
    let stats = RunnerStats { lost: 3, unknown: 1, sessions_attached: 2, sessions_skipped: 1, ..RunnerStats::default() };

    let report = JsonReport::from_parts("oncpu-1234", Some(1234), 100, &stats, &sample_table());
    report.write(BufWriter::new(File::create(&path).unwrap())).unwrap();

    let parsed: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(parsed["task_id"], "oncpu-1234");
    assert_eq!(parsed["frequency_hz"], 100);
    assert_eq!(parsed["totals"]["samples"], 8);
    assert_eq!(parsed["totals"]["lost"], 3);
    assert_eq!(parsed["totals"]["unknown"], 1);
    assert_eq!(parsed["totals"]["unique_stacks"], 3);
    assert_eq!(parsed["totals"]["sessions_skipped"], 1);
    assert_eq!(parsed["stacks"].as_array().unwrap().len(), 3);
    assert_eq!(parsed["stacks"][0]["frames"][0], "parse");
    println!("✅ JSON report written to {}", path.display());
}
