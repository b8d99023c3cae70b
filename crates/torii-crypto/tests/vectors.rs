//! Cross-component exercises of the crypto layer: the full key agreement
//! at wire size against a pinned prime, and frame encryption between two
//! sides holding the same derived session key.

use torii_codec::Packet;
use torii_crypto::{
    BlowfishKey, DiffieHellman, DH_KEY_HEX_SIZE, DH_SHARED_DATA_SIZE, SESSION_KEY_SIZE,
};

/// The 1024-bit MODP group from RFC 2409, used as an operator-pinned
/// prime: it is a real safe prime of exactly the wire size.
const PINNED_PRIME: &str = "\
FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74\
020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437\
4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE65381FFFFFFFFFFFFFFFF";

#[test]
fn pinned_prime_save_load_round_trip() {
    let params = DiffieHellman::load_prime_hex(PINNED_PRIME).unwrap();
    assert_eq!(params.size(), DH_SHARED_DATA_SIZE);
    assert_eq!(params.prime_hex().unwrap(), PINNED_PRIME);

    let bytes = params.save_prime_bytes().unwrap();
    assert_eq!(bytes.len(), DH_SHARED_DATA_SIZE);

    let reloaded = DiffieHellman::load_prime_bytes(&bytes).unwrap();
    assert_eq!(reloaded.prime_hex().unwrap(), PINNED_PRIME);
}

#[test]
fn load_rejects_wrong_sizes() {
    assert!(DiffieHellman::load_prime_hex("2").is_err());
    assert!(DiffieHellman::load_prime_hex(&"G".repeat(DH_KEY_HEX_SIZE)).is_err());
    assert!(DiffieHellman::load_prime_bytes(&[0xFF; 64]).is_err());

    // A leading zero byte shrinks the value below the wire size.
    let mut bytes = [0xFFu8; DH_SHARED_DATA_SIZE];
    bytes[0] = 0;
    assert!(DiffieHellman::load_prime_bytes(&bytes).is_err());
}

#[test]
fn both_roles_derive_the_same_session_key() {
    // Server side owns the template and sends prime + public.
    let mut server = DiffieHellman::load_prime_hex(PINNED_PRIME).unwrap();
    let server_public = server.generate_public().unwrap();
    assert_eq!(server_public.len(), DH_KEY_HEX_SIZE);

    // Client side loads the received prime and answers with its public.
    let mut client = DiffieHellman::load_prime_hex(&server.prime_hex().unwrap()).unwrap();
    let client_public = client.generate_public().unwrap();
    assert_eq!(client_public.len(), DH_KEY_HEX_SIZE);

    let client_shared = client.shared_secret(&server_public).unwrap();
    let server_shared = server.shared_secret(&client_public).unwrap();

    assert_eq!(client_shared.len(), DH_SHARED_DATA_SIZE);
    assert_eq!(client_shared.as_slice(), server_shared.as_slice());

    // Both install the same Blowfish key and can exchange a frame.
    let send_key = BlowfishKey::session(&client_shared).unwrap();
    let recv_key = BlowfishKey::session(&server_shared[..SESSION_KEY_SIZE]).unwrap();

    let mut frame = Packet::new();
    frame.write_blank(8).unwrap();
    frame.write_array(b"ping across the session").unwrap();

    send_key.encrypt_packet(&mut frame).unwrap();
    recv_key.decrypt_packet(&mut frame).unwrap();

    frame.rewind();
    let padded = frame.read_u32_big().unwrap();
    let real = frame.read_u32_big().unwrap();
    assert_eq!(real, 23);
    assert_eq!(padded, 24);
    assert_eq!(frame.read_array(real).unwrap(), b"ping across the session");
}

#[test]
fn tampered_frame_does_not_decrypt_to_the_payload() {
    let key = BlowfishKey::new(b"turnkey!").unwrap();

    let mut frame = Packet::new();
    frame.write_blank(8).unwrap();
    frame.write_array(b"original payload").unwrap();
    key.encrypt_packet(&mut frame).unwrap();

    frame.seek(9).unwrap();
    let byte = frame.peek_u8().unwrap();
    frame.write_u8(byte ^ 0xFF).unwrap();

    key.decrypt_packet(&mut frame).unwrap();
    assert_ne!(&frame.as_bytes()[8..24], b"original payload");
}
