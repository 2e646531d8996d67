//! Catalog of supported streaming platforms.
//!
//! Each platform is known by a stable snake_case key, which is what gets
//! persisted as the user's preference. The Odesli API uses its own names for
//! the platforms, and often returns separate entries for the native app and
//! the web player. [`PlatformDescriptor::aliases`] lists those names in order
//! of preference.

use std::fmt;

use crate::shell::Shell;

/// Identifiers of a platform's native app.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NativeApp {
    /// Android package id.
    pub android_package: &'static str,

    /// URL scheme the app registers, as used on iOS and desktop systems.
    pub url_scheme: &'static str,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PlatformDescriptor {
    pub key: &'static str,
    pub name: &'static str,

    /// Keys of `linksByPlatform` in an Odesli response that link to this
    /// platform, native app renditions before web ones.
    pub aliases: &'static [&'static str],

    pub app: Option<NativeApp>,
}

impl fmt::Display for PlatformDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

pub const PLATFORMS: [PlatformDescriptor; 8] = [
    PlatformDescriptor {
        key: "spotify",
        name: "Spotify",
        aliases: &["spotify", "spotifyWeb"],
        app: Some(NativeApp {
            android_package: "com.spotify.music",
            url_scheme: "spotify",
        }),
    },
    PlatformDescriptor {
        key: "apple_music",
        name: "Apple Music",
        aliases: &["appleMusic", "appleMusicWeb", "itunes"],
        app: Some(NativeApp {
            android_package: "com.apple.android.music",
            url_scheme: "music",
        }),
    },
    PlatformDescriptor {
        key: "youtube_music",
        name: "YouTube Music",
        aliases: &["youtubeMusic", "youtubeMusicWeb", "youtube"],
        app: Some(NativeApp {
            android_package: "com.google.android.apps.youtube.music",
            url_scheme: "youtubemusic",
        }),
    },
    PlatformDescriptor {
        key: "deezer",
        name: "Deezer",
        aliases: &["deezer", "deezerWeb"],
        app: Some(NativeApp {
            android_package: "deezer.android.app",
            url_scheme: "deezer",
        }),
    },
    PlatformDescriptor {
        key: "tidal",
        name: "Tidal",
        aliases: &["tidal", "tidalWeb"],
        app: Some(NativeApp {
            android_package: "com.aspiro.tidal",
            url_scheme: "tidal",
        }),
    },
    PlatformDescriptor {
        key: "amazon_music",
        name: "Amazon Music",
        aliases: &["amazonMusic", "amazonMusicWeb", "amazonStore"],
        app: Some(NativeApp {
            android_package: "com.amazon.mp3",
            url_scheme: "amznmp3",
        }),
    },
    PlatformDescriptor {
        key: "pandora",
        name: "Pandora",
        aliases: &["pandora", "pandoraWeb"],
        app: Some(NativeApp {
            android_package: "com.pandora.android",
            url_scheme: "pandora",
        }),
    },
    PlatformDescriptor {
        key: "soundcloud",
        name: "SoundCloud",
        aliases: &["soundcloud", "soundcloudWeb"],
        app: Some(NativeApp {
            android_package: "com.soundcloud.android",
            url_scheme: "soundcloud",
        }),
    },
];

#[must_use]
pub fn lookup(key: &str) -> Option<&'static PlatformDescriptor> {
    PLATFORMS.iter().find(|platform| platform.key == key)
}

#[must_use]
pub fn native_app(key: &str) -> Option<NativeApp> {
    lookup(key).and_then(|platform| platform.app)
}

/// Name to show for a stored preference.
///
/// Returns "None" when nothing is stored, and "Unknown" when the stored key
/// is not in the catalog.
#[must_use]
pub fn display_name(key: Option<&str>) -> &'static str {
    match key {
        None => "None",
        Some(key) => lookup(key).map_or("Unknown", |platform| platform.name),
    }
}

/// Probes whether the platform's native app is installed.
///
/// Unknown platforms, platforms without an app and failing probes all report
/// `false`.
pub async fn is_installed(shell: &dyn Shell, key: &str) -> bool {
    let Some(app) = native_app(key) else {
        return false;
    };

    match shell.is_app_installed(&app).await {
        Ok(installed) => installed,
        Err(e) => {
            debug!("could not probe for {}: {e}", app.android_package);
            false
        }
    }
}
