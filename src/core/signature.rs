// ECDSA signing and verification over secp256k1

use crate::core::{sha256_hash, Address};
use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1, SecretKey};

/// Sign a payload: ECDSA over SHA256(payload), DER encoded
pub fn sign_payload(secret_key: &SecretKey, payload: &[u8]) -> Vec<u8> {
    let secp = Secp256k1::signing_only();
    let message = Message::from_digest(sha256_hash(payload));
    secp.sign_ecdsa(&message, secret_key).serialize_der().to_vec()
}

/// Verify a DER signature over SHA256(payload) against an address.
/// Malformed addresses or signatures surface as `Err`.
pub fn verify_payload(address: &Address, payload: &[u8], signature: &[u8]) -> Result<bool, String> {
    let pubkey_bytes = address.to_pubkey_bytes()?;
    let pubkey = PublicKey::from_slice(&pubkey_bytes)
        .map_err(|e| format!("Invalid public key: {}", e))?;
    let sig = Signature::from_der(signature)
        .map_err(|e| format!("Invalid signature encoding: {}", e))?;

    let secp = Secp256k1::verification_only();
    let message = Message::from_digest(sha256_hash(payload));
    Ok(secp.verify_ecdsa(&message, &sig, &pubkey).is_ok())
}
