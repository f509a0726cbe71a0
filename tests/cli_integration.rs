use ethers_core::types::transaction::eip2718::TypedTransaction;
use ethers_core::types::{Address, U256};
use ethers_core::utils::rlp::Rlp;
use serde_json::Value;
use std::process::Command;

const HARDHAT_ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

fn run_cli(args: &[&str]) -> Value {
    let binary_path = assert_cmd::cargo::cargo_bin!("ledger-connector");
    let output = Command::new(binary_path)
        .args(["--transport", "simulator", "--json"])
        .args(args)
        .env_remove("LEDGER_GATING_TOKEN")
        .env_remove("LEDGER_SPECULOS_URL")
        .env_remove("LEDGER_CAL_URL")
        .env_remove("LEDGER_CAL_MODE")
        .output()
        .expect("cli runs");

    assert!(
        output.status.success(),
        "cli exited unsuccessfully: {:?}",
        output
    );
    let stdout = String::from_utf8(output.stdout).expect("stdout is utf8");
    serde_json::from_str(stdout.trim()).expect("stdout is valid json")
}

#[test]
fn cli_prints_simulator_address() {
    let output = run_cli(&["address"]);
    assert_eq!(output["address"], HARDHAT_ADDRESS);
    assert_eq!(output["derivationPath"], "44'/60'/0'/0/0");
}

#[test]
fn cli_honours_derivation_path() {
    let output = run_cli(&["--derivation-path", "44'/60'/0'/0/1", "address"]);
    assert_eq!(output["address"], "0x70997970C51812dc3A010C7d01b50e0d17dc79C8");
}

#[test]
fn cli_signs_dummy_transaction() {
    let output = run_cli(&["sign-transaction"]);
    let signed = output["signedTransaction"].as_str().expect("signed hex");
    assert!(signed.starts_with("0x02"), "typed envelope: {}", signed);

    let bytes = hex::decode(&signed[2..]).expect("valid hex");
    let (tx, signature) =
        TypedTransaction::decode_signed(&Rlp::new(&bytes)).expect("decodes as signed tx");

    let own: Address = HARDHAT_ADDRESS.parse().unwrap();
    assert!(signature.v <= 1);
    assert_eq!(signature.recover(tx.sighash()).unwrap(), own);
    assert_eq!(tx.to_addr(), Some(&own));
    assert_eq!(tx.value(), Some(&U256::exp10(18)));
    assert_eq!(tx.gas(), Some(&U256::from(21_000u64)));
    assert_eq!(tx.chain_id().map(|c| c.as_u64()), Some(1));
}

#[test]
fn cli_signs_message() {
    let output = run_cli(&["sign-message", "hello ledger"]);
    let signature = output["signature"].as_str().expect("signature hex");
    assert_eq!(signature.len(), 132);
    assert!(signature.ends_with("00") || signature.ends_with("01"));
}

#[test]
fn cli_rejects_unknown_transport() {
    let binary_path = assert_cmd::cargo::cargo_bin!("ledger-connector");
    let output = Command::new(binary_path)
        .args(["--transport", "bluetooth", "address"])
        .output()
        .expect("cli runs");
    assert!(!output.status.success());
}
