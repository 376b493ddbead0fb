//! `sendy keygen`: mint an identity and print it.

use sendy_crypto::Identity;

pub fn run() -> anyhow::Result<()> {
    let identity = Identity::generate();
    let keyfile = identity.to_keyfile_bytes();

    println!("Public key (your ID): {}", identity.peer_id());
    println!("Private key:          {}", hex::encode(&keyfile[..32]));
    println!();
    println!("Save these keys securely!");
    Ok(())
}
