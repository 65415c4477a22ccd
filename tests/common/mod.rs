//! Shared fixtures: an ephemeral store seeded with pullable images.

#![allow(dead_code)]

use ocitree::reference::RemoteRef;
use ocitree::store::{LocalStore, RemoteImageSpec};

/// An empty ephemeral store with `alpine:latest`, `alpine:3.15` and
/// `busybox:latest` registered as pullable images.
pub fn seeded_store() -> LocalStore {
    let store = LocalStore::ephemeral().expect("failed to create ephemeral store");

    seed(
        &store,
        "alpine:latest",
        RemoteImageSpec::new()
            .layer(
                "/bin/sh -c #(nop) ADD file:rootfs in / ",
                "",
                &[
                    ("/bin/busybox", b"busybox-1.36"),
                    ("/etc/os-release", b"VERSION_ID=3.20"),
                ],
            )
            .layer("/bin/sh -c #(nop)  CMD [\"/bin/sh\"]", "", &[]),
    );
    seed(
        &store,
        "alpine:3.15",
        RemoteImageSpec::new()
            .layer(
                "/bin/sh -c #(nop) ADD file:rootfs in / ",
                "",
                &[
                    ("/bin/busybox", b"busybox-1.34"),
                    ("/etc/os-release", b"VERSION_ID=3.15"),
                ],
            )
            .layer("/bin/sh -c #(nop)  CMD [\"/bin/sh\"]", "", &[]),
    );
    seed(
        &store,
        "busybox:latest",
        RemoteImageSpec::new().layer(
            "/bin/sh -c #(nop) ADD file:rootfs in / ",
            "",
            &[("/bin/busybox", b"busybox-standalone")],
        ),
    );

    store
}

fn seed(store: &LocalStore, reference: &str, spec: RemoteImageSpec) {
    let remote = RemoteRef::parse(reference).expect("invalid seed reference");
    store.seed_remote(&remote, spec).expect("failed to seed registry");
}
