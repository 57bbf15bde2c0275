//! Session-Registry – prozessweite Tabelle der aktiven Voice-Sessions
//!
//! Schluessel ist der Voice-Kanal, pro Kanal existiert hoechstens ein Eintrag.
//! Ein Join reserviert den Kanal schon vor dem Verbinden; sichtbar
//! (`find_by_channel`) wird die Session erst nach erfolgreichem Verbinden.
//!
//! Alle Operationen laufen ueber den Eintrags-Lock der DashMap und sind damit
//! pro Kanal total geordnet. Niemand liest oder schreibt Eintraege an der
//! Registry vorbei.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use funkrelais_core::{ChannelId, RelayError, Result, SessionId};
use std::sync::Arc;
use tracing::debug;

use crate::session::SessionHandle;

/// Eintrag fuer einen Kanal
enum Eintrag {
    /// Join laeuft, Verbindung wird aufgebaut
    Reserviert(Arc<SessionHandle>),
    /// Verbunden und streamend
    Aktiv(Arc<SessionHandle>),
}

impl Eintrag {
    fn handle(&self) -> &Arc<SessionHandle> {
        match self {
            Eintrag::Reserviert(h) | Eintrag::Aktiv(h) => h,
        }
    }
}

/// Prozessweite Registry aller Voice-Sessions
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<DashMap<ChannelId, Eintrag>>,
}

impl SessionRegistry {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Reserviert den Kanal fuer einen laufenden Join
    ///
    /// Schlaegt mit `SessionExistiert` fehl, wenn der Kanal belegt ist.
    pub fn reservieren(&self, handle: &Arc<SessionHandle>) -> Result<()> {
        match self.inner.entry(handle.kanal()) {
            Entry::Occupied(_) => Err(RelayError::SessionExistiert(handle.kanal())),
            Entry::Vacant(eintrag) => {
                eintrag.insert(Eintrag::Reserviert(Arc::clone(handle)));
                debug!(kanal = %handle.kanal(), session = %handle.id(), "Kanal reserviert");
                Ok(())
            }
        }
    }

    /// Traegt eine verbundene Session ein
    ///
    /// Die eigene Reservierung wird zum aktiven Eintrag. Ein fremder Eintrag
    /// fuehrt zu `SessionExistiert`, der bestehende Eintrag bleibt unveraendert.
    /// Wurde das Schliessen bereits angefordert, wird nichts eingetragen
    /// (`Abgebrochen`).
    pub fn add(&self, kanal: ChannelId, handle: Arc<SessionHandle>) -> Result<()> {
        match self.inner.entry(kanal) {
            Entry::Occupied(mut eintrag) => {
                let eigene_reservierung = matches!(
                    eintrag.get(),
                    Eintrag::Reserviert(h) if h.id() == handle.id()
                );
                if !eigene_reservierung {
                    return Err(RelayError::SessionExistiert(kanal));
                }
                eintrag.insert(Eintrag::Aktiv(handle));
                Ok(())
            }
            Entry::Vacant(eintrag) => {
                if handle.schliessen_angefordert() {
                    return Err(RelayError::Abgebrochen(kanal));
                }
                eintrag.insert(Eintrag::Aktiv(handle));
                Ok(())
            }
        }
    }

    /// Aktive Session eines Kanals (Reservierungen sind unsichtbar)
    pub fn find_by_channel(&self, kanal: ChannelId) -> Option<Arc<SessionHandle>> {
        self.inner.get(&kanal).and_then(|eintrag| match eintrag.value() {
            Eintrag::Aktiv(h) => Some(Arc::clone(h)),
            Eintrag::Reserviert(_) => None,
        })
    }

    /// Loest den Eintrag des Kanals und fordert das Schliessen an
    ///
    /// Wirkt auch auf Reservierungen. `None` ist kein Fehler: es gab nichts
    /// zu verlassen. Der eigentliche Abbau laeuft im Session-Task.
    pub fn remove_and_close(&self, kanal: ChannelId) -> Option<Arc<SessionHandle>> {
        match self.inner.entry(kanal) {
            Entry::Occupied(eintrag) => {
                let handle = Arc::clone(eintrag.get().handle());
                // Noch unter dem Eintrags-Lock: ein gleichzeitiges add sieht
                // entweder den Eintrag oder die Schliess-Anforderung
                handle.schliessen_anfordern();
                eintrag.remove();
                debug!(kanal = %kanal, session = %handle.id(), "Session aus Registry geloest");
                Some(handle)
            }
            Entry::Vacant(_) => None,
        }
    }

    /// Entfernt den Eintrag nur, wenn er zur gegebenen Session gehoert
    pub fn entfernen(&self, kanal: ChannelId, session: SessionId) -> bool {
        self.inner
            .remove_if(&kanal, |_, eintrag| eintrag.handle().id() == session)
            .is_some()
    }

    /// Loest alle Eintraege (inkl. Reservierungen) und fordert das Schliessen an
    pub fn alle_entfernen(&self) -> Vec<Arc<SessionHandle>> {
        let kanaele: Vec<ChannelId> = self.inner.iter().map(|e| *e.key()).collect();
        kanaele
            .into_iter()
            .filter_map(|kanal| self.remove_and_close(kanal))
            .collect()
    }

    /// Alle aktiven Sessions
    pub fn aktive_sessions(&self) -> Vec<Arc<SessionHandle>> {
        self.inner
            .iter()
            .filter_map(|e| match e.value() {
                Eintrag::Aktiv(h) => Some(Arc::clone(h)),
                Eintrag::Reserviert(_) => None,
            })
            .collect()
    }

    /// Anzahl aktiver Sessions
    pub fn anzahl(&self) -> usize {
        self.inner
            .iter()
            .filter(|e| matches!(e.value(), Eintrag::Aktiv(_)))
            .count()
    }

    /// Anzahl aller Eintraege inkl. Reservierungen
    pub fn anzahl_eintraege(&self) -> usize {
        self.inner.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kanal(n: u64) -> ChannelId {
        ChannelId(n)
    }

    #[test]
    fn add_und_find() {
        let registry = SessionRegistry::neu();
        let s = SessionHandle::neu(kanal(1));
        registry.add(kanal(1), Arc::clone(&s)).unwrap();

        let gefunden = registry.find_by_channel(kanal(1)).unwrap();
        assert_eq!(gefunden.id(), s.id());
        assert!(registry.find_by_channel(kanal(2)).is_none());
        assert_eq!(registry.anzahl(), 1);
    }

    #[test]
    fn doppeltes_add_wird_abgelehnt() {
        let registry = SessionRegistry::neu();
        let erste = SessionHandle::neu(kanal(1));
        let zweite = SessionHandle::neu(kanal(1));

        registry.add(kanal(1), Arc::clone(&erste)).unwrap();
        let ergebnis = registry.add(kanal(1), Arc::clone(&zweite));
        assert_eq!(ergebnis, Err(RelayError::SessionExistiert(kanal(1))));

        // Erster Eintrag unveraendert
        assert_eq!(registry.find_by_channel(kanal(1)).unwrap().id(), erste.id());
        assert!(!erste.schliessen_angefordert());
    }

    #[test]
    fn find_bis_remove_and_close() {
        let registry = SessionRegistry::neu();
        let s = SessionHandle::neu(kanal(3));
        registry.add(kanal(3), Arc::clone(&s)).unwrap();

        for _ in 0..3 {
            assert!(registry.find_by_channel(kanal(3)).is_some());
        }

        let entfernt = registry.remove_and_close(kanal(3)).unwrap();
        assert_eq!(entfernt.id(), s.id());
        assert!(s.schliessen_angefordert());
        assert!(registry.find_by_channel(kanal(3)).is_none());
    }

    #[test]
    fn remove_and_close_ohne_eintrag_ist_none() {
        let registry = SessionRegistry::neu();
        assert!(registry.remove_and_close(kanal(9)).is_none());
        assert!(registry.remove_and_close(kanal(9)).is_none());
    }

    #[test]
    fn reservierung_ist_unsichtbar_und_exklusiv() {
        let registry = SessionRegistry::neu();
        let s = SessionHandle::neu(kanal(1));
        registry.reservieren(&s).unwrap();

        assert!(registry.find_by_channel(kanal(1)).is_none());
        assert_eq!(registry.anzahl(), 0);
        assert_eq!(registry.anzahl_eintraege(), 1);

        let andere = SessionHandle::neu(kanal(1));
        assert_eq!(
            registry.reservieren(&andere),
            Err(RelayError::SessionExistiert(kanal(1)))
        );
        assert_eq!(
            registry.add(kanal(1), andere),
            Err(RelayError::SessionExistiert(kanal(1)))
        );

        // Eigene Reservierung wird aktiv
        registry.add(kanal(1), Arc::clone(&s)).unwrap();
        assert_eq!(registry.find_by_channel(kanal(1)).unwrap().id(), s.id());
    }

    #[test]
    fn geloeste_reservierung_wird_nicht_eingetragen() {
        let registry = SessionRegistry::neu();
        let s = SessionHandle::neu(kanal(2));
        registry.reservieren(&s).unwrap();

        let geloest = registry.remove_and_close(kanal(2)).unwrap();
        assert_eq!(geloest.id(), s.id());
        assert!(s.schliessen_angefordert());

        assert_eq!(
            registry.add(kanal(2), Arc::clone(&s)),
            Err(RelayError::Abgebrochen(kanal(2)))
        );
        assert_eq!(registry.anzahl_eintraege(), 0);
    }

    #[test]
    fn entfernen_nur_eigener_eintrag() {
        let registry = SessionRegistry::neu();
        let alt = SessionHandle::neu(kanal(5));
        let neu = SessionHandle::neu(kanal(5));

        registry.add(kanal(5), Arc::clone(&neu)).unwrap();
        // Eine alte Session darf den neuen Eintrag nicht entfernen
        assert!(!registry.entfernen(kanal(5), alt.id()));
        assert!(registry.find_by_channel(kanal(5)).is_some());

        assert!(registry.entfernen(kanal(5), neu.id()));
        assert!(registry.find_by_channel(kanal(5)).is_none());
        // Kein Schliessen angefordert: entfernen ist Teil des Abbaus
        assert!(!neu.schliessen_angefordert());
    }

    #[test]
    fn alle_entfernen_loest_alles() {
        let registry = SessionRegistry::neu();
        let a = SessionHandle::neu(kanal(1));
        let b = SessionHandle::neu(kanal(2));
        registry.add(kanal(1), Arc::clone(&a)).unwrap();
        registry.reservieren(&b).unwrap();

        let geloest = registry.alle_entfernen();
        assert_eq!(geloest.len(), 2);
        assert!(a.schliessen_angefordert());
        assert!(b.schliessen_angefordert());
        assert_eq!(registry.anzahl_eintraege(), 0);
    }

    #[test]
    fn verschiedene_kanaele_parallel() {
        let registry = SessionRegistry::neu();
        let threads: Vec<_> = (0..8u64)
            .map(|n| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    let s = SessionHandle::neu(ChannelId(n));
                    registry.add(ChannelId(n), s).unwrap();
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(registry.anzahl(), 8);
        assert_eq!(registry.aktive_sessions().len(), 8);
    }

    #[test]
    fn gleicher_kanal_parallel_genau_ein_gewinner() {
        let registry = SessionRegistry::neu();
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.add(kanal(7), SessionHandle::neu(kanal(7))).is_ok())
            })
            .collect();
        let gewinner = threads
            .into_iter()
            .map(|t| t.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(gewinner, 1);
    }
}
