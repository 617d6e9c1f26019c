//! Key vault: the wrapped-bundle hierarchy and the unlocked session
//!
//! `UserCryptoProperties` is the only key material a server ever stores.
//! All bundles in it are replaced together; no partial updates, so a reader
//! can never observe a mixed key set.

use ed25519_dalek::SigningKey;
use rand::RngCore;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret as X25519Secret};
use zeroize::Zeroize;

use crate::bundle::{b64_decode, b64_encode, KeyPairBundle, MetadataBundle, SecretKeyBundle};
use crate::error::{CryptoError, CryptoResult};
use crate::kdf::{derive_master_key, KdfParams, MasterKey};
use crate::keys::{derive_metadata_key, ContentKey};
use crate::recovery::{generate_recovery_key, recovery_key_from_phrase, RecoveryKey};
use crate::{KEY_SIZE, SALT_SIZE};

/// Per-account key material, stored server-side. Created at signup, replaced
/// wholesale on rotation, never mutated field-by-field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCryptoProperties {
    /// base64, 16 bytes decoded; input to the passphrase KDF
    pub salt: String,
    /// KDF cost parameters recorded at creation time
    pub kdf_params: KdfParams,
    /// Master key wrapped under the passphrase-derived wrapping key
    pub master_key_bundle: SecretKeyBundle,
    /// Master key wrapped under the recovery key
    pub recovery_master_key_bundle: SecretKeyBundle,
    /// Recovery key wrapped under the master key (lets an unlocked session
    /// re-derive the recovery pairing during rotation)
    pub recovery_key_bundle: SecretKeyBundle,
    /// X25519 keypair, private half wrapped under the master key
    pub asymmetric_key_bundle: KeyPairBundle,
    /// Ed25519 keypair, private half wrapped under the master key
    pub signing_key_bundle: KeyPairBundle,
}

impl UserCryptoProperties {
    pub fn to_bytes(&self) -> CryptoResult<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| CryptoError::encoding("crypto properties", e))
    }

    pub fn from_bytes(data: &[u8]) -> CryptoResult<Self> {
        serde_json::from_slice(data).map_err(|e| CryptoError::encoding("crypto properties", e))
    }
}

/// Create a fresh account key set from a passphrase.
///
/// Returns the properties to persist and the 24-word recovery phrase to show
/// the user exactly once.
pub fn create_account(
    passphrase: &SecretString,
    kdf_params: &KdfParams,
) -> CryptoResult<(UserCryptoProperties, String)> {
    let mut salt = [0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut salt);

    let wrapping_key = derive_master_key(passphrase, &salt, kdf_params)?;

    let mut master_bytes = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut master_bytes);
    let master = MasterKey::from_bytes(master_bytes);
    master_bytes.zeroize();

    let (phrase, recovery) = generate_recovery_key()?;

    // fresh keypairs; private halves live only inside wrapped bundles
    let x_secret = X25519Secret::random_from_rng(rand::thread_rng());
    let mut ed_seed = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut ed_seed);

    let props = assemble_properties(
        &salt,
        kdf_params,
        &wrapping_key,
        &master,
        &recovery,
        &x_secret,
        &ed_seed,
    )?;
    ed_seed.zeroize();

    tracing::info!("account key set created");
    Ok((props, phrase))
}

/// Unwrap the master key via the passphrase path.
///
/// A wrong passphrase and a corrupted bundle both surface as
/// `Authentication`; the distinction is intentionally not observable.
pub fn unwrap_master_key(
    passphrase: &SecretString,
    props: &UserCryptoProperties,
) -> CryptoResult<MasterKey> {
    let salt = b64_decode("salt", &props.salt)?;
    let wrapping_key = derive_master_key(passphrase, &salt, &props.kdf_params)?;

    let mut master_bytes = props.master_key_bundle.unwrap_key(wrapping_key.as_bytes())?;
    let master = MasterKey::from_bytes(master_bytes);
    master_bytes.zeroize();
    Ok(master)
}

/// Unwrap the master key via the recovery path. Independent of the
/// passphrase; yields the exact same master key bytes.
pub fn unwrap_with_recovery_key(
    phrase: &str,
    props: &UserCryptoProperties,
) -> CryptoResult<MasterKey> {
    let recovery = recovery_key_from_phrase(phrase)?;

    let mut master_bytes = props
        .recovery_master_key_bundle
        .unwrap_key(recovery.as_bytes())?;
    let master = MasterKey::from_bytes(master_bytes);
    master_bytes.zeroize();
    Ok(master)
}

fn assemble_properties(
    salt: &[u8; SALT_SIZE],
    kdf_params: &KdfParams,
    wrapping_key: &MasterKey,
    master: &MasterKey,
    recovery: &RecoveryKey,
    x_secret: &X25519Secret,
    ed_seed: &[u8; KEY_SIZE],
) -> CryptoResult<UserCryptoProperties> {
    let x_public = X25519Public::from(x_secret);
    let signing = SigningKey::from_bytes(ed_seed);

    let mut x_secret_bytes = x_secret.to_bytes();
    let asymmetric_key_bundle =
        KeyPairBundle::wrap(master.as_bytes(), x_public.as_bytes(), &x_secret_bytes)?;
    x_secret_bytes.zeroize();

    let signing_key_bundle = KeyPairBundle::wrap(
        master.as_bytes(),
        &signing.verifying_key().to_bytes(),
        ed_seed,
    )?;

    Ok(UserCryptoProperties {
        salt: b64_encode(salt),
        kdf_params: kdf_params.clone(),
        master_key_bundle: SecretKeyBundle::wrap(wrapping_key.as_bytes(), master.as_bytes())?,
        recovery_master_key_bundle: SecretKeyBundle::wrap(recovery.as_bytes(), master.as_bytes())?,
        recovery_key_bundle: SecretKeyBundle::wrap(master.as_bytes(), recovery.as_bytes())?,
        asymmetric_key_bundle,
        signing_key_bundle,
    })
}

/// An authenticated session. Exclusively owns the unwrapped master key for
/// its lifetime; no other component caches key material. Dropping the
/// session (logout) zeroizes everything.
pub struct VaultSession {
    master: MasterKey,
}

impl VaultSession {
    /// Unlock with the passphrase.
    pub fn unlock(passphrase: &SecretString, props: &UserCryptoProperties) -> CryptoResult<Self> {
        Ok(Self {
            master: unwrap_master_key(passphrase, props)?,
        })
    }

    /// Unlock with the 24-word recovery phrase.
    pub fn unlock_with_recovery(phrase: &str, props: &UserCryptoProperties) -> CryptoResult<Self> {
        Ok(Self {
            master: unwrap_with_recovery_key(phrase, props)?,
        })
    }

    /// Wrap a per-file content key for storage in an object manifest.
    pub fn wrap_content_key(&self, key: &ContentKey) -> CryptoResult<SecretKeyBundle> {
        SecretKeyBundle::wrap(self.master.as_bytes(), key.as_bytes())
    }

    pub fn unwrap_content_key(&self, bundle: &SecretKeyBundle) -> CryptoResult<ContentKey> {
        let mut bytes = bundle.unwrap_key(self.master.as_bytes())?;
        let key = ContentKey::from_bytes(bytes);
        bytes.zeroize();
        Ok(key)
    }

    /// Encrypt object metadata (e.g. the file name) under the HKDF-derived
    /// metadata key.
    pub fn wrap_metadata(&self, metadata: &[u8]) -> CryptoResult<MetadataBundle> {
        let mut mk = derive_metadata_key(&self.master)?;
        let bundle = MetadataBundle::wrap(&mk, metadata);
        mk.zeroize();
        bundle
    }

    pub fn unwrap_metadata(&self, bundle: &MetadataBundle) -> CryptoResult<Vec<u8>> {
        let mut mk = derive_metadata_key(&self.master)?;
        let metadata = bundle.unwrap_metadata(&mk);
        mk.zeroize();
        metadata
    }

    /// Recover the Ed25519 signing key from its bundle, verifying the
    /// public-half invariant.
    pub fn signing_key(&self, props: &UserCryptoProperties) -> CryptoResult<SigningKey> {
        let mut seed = props
            .signing_key_bundle
            .unwrap_private_key(self.master.as_bytes())?;
        let signing = SigningKey::from_bytes(&seed);
        seed.zeroize();

        if signing.verifying_key().to_bytes() != props.signing_key_bundle.public_key_bytes()? {
            return Err(CryptoError::Authentication);
        }
        Ok(signing)
    }

    /// Recover the X25519 secret from its bundle, verifying the public-half
    /// invariant.
    pub fn asymmetric_key(&self, props: &UserCryptoProperties) -> CryptoResult<X25519Secret> {
        let mut bytes = props
            .asymmetric_key_bundle
            .unwrap_private_key(self.master.as_bytes())?;
        let secret = X25519Secret::from(bytes);
        bytes.zeroize();

        if X25519Public::from(&secret).to_bytes() != props.asymmetric_key_bundle.public_key_bytes()?
        {
            return Err(CryptoError::Authentication);
        }
        Ok(secret)
    }

    /// Rotate to a new passphrase: fresh salt, fresh recovery pairing, every
    /// bundle rewrapped. The master key itself is unchanged, so existing
    /// object manifests stay decryptable. Builds the complete replacement
    /// set or fails; the caller swaps the whole `UserCryptoProperties`.
    ///
    /// Returns the new properties and the new recovery phrase.
    pub fn rotate_master_key(
        &self,
        new_passphrase: &SecretString,
        props: &UserCryptoProperties,
    ) -> CryptoResult<(UserCryptoProperties, String)> {
        let mut salt = [0u8; SALT_SIZE];
        rand::thread_rng().fill_bytes(&mut salt);

        let wrapping_key = derive_master_key(new_passphrase, &salt, &props.kdf_params)?;
        let (phrase, recovery) = generate_recovery_key()?;

        // keypairs survive rotation; unwrap with the (unchanged) master key
        // and rewrap with fresh nonces
        let x_secret = self.asymmetric_key(props)?;
        let signing = self.signing_key(props)?;
        let mut ed_seed = signing.to_bytes();

        let rotated = assemble_properties(
            &salt,
            &props.kdf_params,
            &wrapping_key,
            &self.master,
            &recovery,
            &x_secret,
            &ed_seed,
        )?;
        ed_seed.zeroize();

        tracing::info!("master key rewrapped under new passphrase");
        Ok((rotated, phrase))
    }

    /// Explicit logout. Equivalent to dropping the session; key material is
    /// zeroized either way.
    pub fn logout(self) {}
}

impl std::fmt::Debug for VaultSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultSession").finish_non_exhaustive()
    }
}
