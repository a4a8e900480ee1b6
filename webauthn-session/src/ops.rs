pub mod webauthn;
